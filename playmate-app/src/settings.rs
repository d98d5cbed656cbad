//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use playmate_core::{
    audio::VoiceProcessing,
    capture::{CaptureSettings, DEFAULT_INPUT_GAIN, MAX_INPUT_GAIN, MIN_INPUT_GAIN},
    channel::{DEFAULT_MODEL, DEFAULT_VOICE},
    SessionConfig, SessionSetup,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub input_gain: f32,
    pub settle_delay_ms: u64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub mic_enabled: bool,
    pub output_muted: bool,
    pub model: String,
    pub voice: String,
    /// Agent bridge sidecar: program followed by its arguments.
    pub bridge_command: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            input_gain: DEFAULT_INPUT_GAIN,
            settle_delay_ms: 500,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            mic_enabled: true,
            output_muted: false,
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            bridge_command: Vec::new(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.input_gain = if self.input_gain.is_finite() {
            self.input_gain.clamp(MIN_INPUT_GAIN, MAX_INPUT_GAIN)
        } else {
            DEFAULT_INPUT_GAIN
        };
        self.settle_delay_ms = self.settle_delay_ms.min(5_000);
        self.preferred_input_device = normalize_device_name(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.take());
        self.model = normalize_or(&self.model, DEFAULT_MODEL);
        self.voice = normalize_or(&self.voice, DEFAULT_VOICE);
        self.bridge_command = self
            .bridge_command
            .iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect();
    }

    /// `PLAYMATE_INPUT_GAIN` and `PLAYMATE_BRIDGE_COMMAND` win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("PLAYMATE_INPUT_GAIN").ok().as_deref(),
            std::env::var("PLAYMATE_BRIDGE_COMMAND").ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, input_gain: Option<&str>, bridge_command: Option<&str>) {
        if let Some(gain) = input_gain.and_then(|v| v.trim().parse::<f32>().ok()) {
            self.input_gain = gain;
        }
        if let Some(command) = bridge_command {
            let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                self.bridge_command = parts;
            }
        }
        self.normalize();
    }

    pub fn session_config(&self, system_instruction: &str) -> SessionConfig {
        SessionConfig {
            capture: CaptureSettings {
                gain: self.input_gain,
                ..CaptureSettings::default()
            },
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            voice_processing: VoiceProcessing {
                echo_cancellation: self.echo_cancellation,
                noise_suppression: self.noise_suppression,
                auto_gain_control: self.auto_gain_control,
            },
            mic_enabled: self.mic_enabled,
            output_muted: self.output_muted,
            setup: SessionSetup {
                model: self.model.clone(),
                voice: self.voice.clone(),
                system_instruction: system_instruction.to_string(),
                ..SessionSetup::default()
            },
            ..SessionConfig::default()
        }
    }
}

fn normalize_device_name(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

fn normalize_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Playmate")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("playmate")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
