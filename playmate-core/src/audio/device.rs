//! Audio device enumeration and preference resolution.

use serde::{Deserialize, Serialize};

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
}

/// Sort default first, then by name, so UIs list devices stably.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(feature = "audio-cpal")]
mod backend {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    use super::{sort_devices, DeviceInfo};
    use crate::error::{DeviceError, Result};

    fn describe<I>(devices: I, default_name: Option<String>) -> Vec<DeviceInfo>
    where
        I: Iterator<Item = cpal::Device>,
    {
        let mut list = devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo { name, is_default }
            })
            .collect::<Vec<_>>();
        sort_devices(&mut list);
        list
    }

    pub fn list_input_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        match host.input_devices() {
            Ok(devices) => describe(devices, default_name),
            Err(e) => {
                warn!("failed to enumerate input devices: {e}");
                Vec::new()
            }
        }
    }

    pub fn list_output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        match host.output_devices() {
            Ok(devices) => describe(devices, default_name),
            Err(e) => {
                warn!("failed to enumerate output devices: {e}");
                Vec::new()
            }
        }
    }

    /// Preferred name → system default → first available.
    pub fn resolve_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!("preferred input device '{name}' not found, falling back");
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        let mut devices = host
            .input_devices()
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        let fallback = devices.next().ok_or(DeviceError::NoInputDevice)?;
        warn!("no default input device, falling back to first available input");
        Ok(fallback)
    }

    pub fn resolve_output_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = preferred {
            if let Ok(mut devices) = host.output_devices() {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                {
                    return Ok(device);
                }
            }
            warn!("preferred output device '{name}' not found, falling back");
        }
        host.default_output_device()
            .ok_or_else(|| DeviceError::NoOutputDevice.into())
    }
}

#[cfg(feature = "audio-cpal")]
pub use backend::{list_input_devices, list_output_devices};
#[cfg(feature = "audio-cpal")]
pub(crate) use backend::{resolve_input_device, resolve_output_device};

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            DeviceInfo {
                name: "b-usb".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "Z-builtin".into(),
                is_default: true,
            },
            DeviceInfo {
                name: "A-headset".into(),
                is_default: false,
            },
        ];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Z-builtin", "A-headset", "b-usb"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(DeviceInfo {
            name: "Mic".into(),
            is_default: true,
        })
        .unwrap();
        assert_eq!(json["isDefault"], true);
    }
}
