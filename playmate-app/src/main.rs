//! Playmate console host.
//!
//! Starts one live session against the configured agent bridge and keeps it
//! running until the agent hangs up, the user types `quit` or Ctrl+C arrives.

mod bridge;
mod cipher;
mod console;
mod prompt;
mod settings;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use bridge::BridgeConnector;
use clap::Parser;
use console::ConsoleCommand;
use playmate_core::{
    audio::{
        device::{list_input_devices, list_output_devices},
        SpeakerSource,
    },
    LiveSession, SessionState, SessionStatusEvent, VirtualOutput,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use state::{GameDispatcher, GameState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The binary's own targets are rooted at its crate name (`playmate`), not the package name.
const DEFAULT_LOG_FILTER: &str = concat!(env!("CARGO_CRATE_NAME"), "=info,playmate_core=info");

#[derive(Debug, Parser)]
#[command(name = "playmate", version, about = "Voice playmate for young children")]
struct CliArgs {
    /// Play the agent's voice into a virtual device instead of the speaker.
    #[arg(long)]
    headless: bool,

    /// Settings file to use instead of the per-user default.
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Print audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = CliArgs::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let settings_path = args.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    info!(path = %settings_path.display(), "settings loaded");

    let connector = BridgeConnector::from_command(&settings.bridge_command).context(
        "no agent bridge configured; set `bridgeCommand` in settings or PLAYMATE_BRIDGE_COMMAND",
    )?;

    let config = settings.session_config(prompt::SYSTEM_INSTRUCTION);
    let microphone = Box::new(config.microphone());
    let speaker: Box<dyn SpeakerSource> = if args.headless {
        info!("headless: agent speech goes to a virtual output");
        Box::new(Arc::new(VirtualOutput::realtime()))
    } else {
        Box::new(config.speaker())
    };

    let game = Arc::new(GameDispatcher::new());
    let session = LiveSession::new(config, game.clone());
    let mut status_rx = session.subscribe_status();
    let reporter = tokio::spawn(report_game_changes(game.clone(), game.subscribe()));

    info!("playmate starting");
    session.start(microphone, &*speaker, &connector).await?;

    println!("{}", console::HELP);
    let mut console = Console {
        session: &session,
        game: &game,
        settings: &mut settings,
        settings_path: &settings_path,
    };
    console.run(&mut status_rx).await;

    session.stop().await;
    reporter.abort();

    match session.state() {
        SessionState::Error(reason) => bail!("session ended: {reason}"),
        _ => {
            info!("playmate stopped");
            Ok(())
        }
    }
}

fn print_devices() {
    println!("input devices:");
    for device in list_input_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }
    println!("output devices:");
    for device in list_output_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }
}

async fn report_game_changes(game: Arc<GameDispatcher>, mut rx: watch::Receiver<GameState>) {
    let mut image_announced = false;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        info!(
            screen = ?state.current_screen,
            level = state.game_level,
            lives = state.lives,
            score = state.score,
            mood = ?state.avatar_mood,
            "game state changed"
        );
        if let Some(shape) = game.take_pending_shape() {
            println!("drawing template: {shape:?}");
        }
        if state.character.image_requested && !image_announced {
            image_announced = true;
            println!(
                "character ready: {:?} {:?} {}",
                state.character.color, state.character.kind, state.character.accessory
            );
        }
    }
}

fn print_status(event: &SessionStatusEvent) {
    match &event.detail {
        Some(detail) => println!("[{:?}] {detail}", event.status),
        None => println!("[{:?}]", event.status),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Console<'a> {
    session: &'a LiveSession,
    game: &'a GameDispatcher,
    settings: &'a mut AppSettings,
    settings_path: &'a Path,
}

impl Console<'_> {
    async fn run(&mut self, status_rx: &mut broadcast::Receiver<SessionStatusEvent>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("ctrl+c received");
                    break;
                }
                event = status_rx.recv() => match event {
                    Ok(event) => {
                        print_status(&event);
                        if event.status.is_terminal() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "status receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                        Ok(Some(command)) => {
                            if self.handle(command) == Flow::Quit {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(message) => println!("{message}"),
                    },
                    Ok(None) => {
                        info!("stdin closed; running until the session ends");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("failed to read stdin: {e}");
                        stdin_open = false;
                    }
                },
            }
        }
    }

    fn handle(&mut self, command: ConsoleCommand) -> Flow {
        match command {
            ConsoleCommand::Mic(enabled) => self.set_mic(enabled),
            ConsoleCommand::ToggleMic => self.set_mic(!self.session.is_mic_enabled()),
            ConsoleCommand::Mute(muted) => self.set_muted(muted),
            ConsoleCommand::ToggleMute => self.set_muted(!self.session.is_output_muted()),
            ConsoleCommand::Status => self.print_summary(),
            ConsoleCommand::Restart => {
                self.game.restart_cipher();
                println!("cipher game restarted");
            }
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn set_mic(&mut self, enabled: bool) {
        self.session.set_mic_enabled(enabled);
        self.settings.mic_enabled = enabled;
        println!("microphone {}", if enabled { "on" } else { "off" });
        self.persist();
    }

    fn set_muted(&mut self, muted: bool) {
        self.session.set_output_muted(muted);
        self.settings.output_muted = muted;
        println!("voice {}", if muted { "muted" } else { "on" });
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = save_settings(self.settings_path, &*self.settings) {
            warn!("failed to save settings: {e}");
        }
    }

    fn print_summary(&self) {
        println!(
            "session: {:?}, speaking: {}, mic: {}, muted: {}",
            self.session.state(),
            self.session.is_speaking(),
            self.session.is_mic_enabled(),
            self.session.is_output_muted()
        );
        match serde_json::to_string(&self.game.snapshot()) {
            Ok(json) => println!("game: {json}"),
            Err(e) => warn!("failed to encode game state: {e}"),
        }
        match serde_json::to_string(&self.session.diagnostics_snapshot()) {
            Ok(json) => println!("diagnostics: {json}"),
            Err(e) => warn!("failed to encode diagnostics: {e}"),
        }
    }
}
