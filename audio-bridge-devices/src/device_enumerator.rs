//! Audio device enumeration via cpal.
//!
//! Wraps a `cpal::Host` to list capture and playback devices as
//! [`DeviceDescriptor`]s and to resolve the M8 capture device and the
//! preferred output device for a session.

use cpal::traits::{DeviceTrait, HostTrait};

use audio_bridge_core::models::audio_models::{
    find_capture_device, find_playback_device, DeviceDescriptor, DeviceDirection,
};
use audio_bridge_core::models::error::BridgeError;

/// Audio device enumerator over one cpal host.
pub struct DeviceEnumerator {
    host: cpal::Host,
}

impl DeviceEnumerator {
    /// Enumerator over the platform's default host.
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn with_host(host: cpal::Host) -> Self {
        Self { host }
    }

    pub fn host_name(&self) -> &'static str {
        self.host.id().name()
    }

    /// List capture devices.
    pub fn list_capture_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        Ok(self
            .devices(DeviceDirection::Capture)?
            .into_iter()
            .map(|(descriptor, _)| descriptor)
            .collect())
    }

    /// List playback devices.
    pub fn list_playback_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        Ok(self
            .devices(DeviceDirection::Playback)?
            .into_iter()
            .map(|(descriptor, _)| descriptor)
            .collect())
    }

    /// Resolve the capture device whose name contains `pattern`.
    ///
    /// Matching is case-sensitive and the last match wins.
    pub fn find_capture(&self, pattern: &str) -> Result<(DeviceDescriptor, cpal::Device), BridgeError> {
        let devices = self.devices(DeviceDirection::Capture)?;
        log::debug!("found {} capture devices", devices.len());

        let descriptors: Vec<DeviceDescriptor> = devices.iter().map(|(d, _)| d.clone()).collect();
        let found = find_capture_device(&descriptors, pattern).ok_or_else(|| {
            BridgeError::DeviceNotFound {
                pattern: pattern.to_string(),
            }
        })?;

        take_device(devices, &found.id).ok_or_else(|| BridgeError::DeviceNotFound {
            pattern: pattern.to_string(),
        })
    }

    /// Resolve the output device.
    ///
    /// `preferred` is matched case-insensitively as a substring; with no
    /// preference, or none matching, the host's default output is used.
    pub fn find_playback(
        &self,
        preferred: Option<&str>,
    ) -> Result<(DeviceDescriptor, cpal::Device), BridgeError> {
        if let Some(preferred) = preferred {
            let devices = self.devices(DeviceDirection::Playback)?;
            let descriptors: Vec<DeviceDescriptor> =
                devices.iter().map(|(d, _)| d.clone()).collect();
            if let Some(found) = find_playback_device(&descriptors, preferred) {
                log::info!("found requested output device: {}", found.name);
                let id = found.id.clone();
                if let Some(pair) = take_device(devices, &id) {
                    return Ok(pair);
                }
            }
            log::warn!(
                "output device \"{}\" not found, using default output",
                preferred
            );
        }

        let device = self.host.default_output_device().ok_or_else(|| {
            BridgeError::open_failed("default output", "no default output device")
        })?;
        let name = device
            .name()
            .unwrap_or_else(|_| "Default Output Device".to_string());
        let id = device_id(self.host_name(), DeviceDirection::Playback, None);
        log::info!("using default audio device: {}", name);
        Ok((DeviceDescriptor::playback(id, name), device))
    }

    fn devices(
        &self,
        direction: DeviceDirection,
    ) -> Result<Vec<(DeviceDescriptor, cpal::Device)>, BridgeError> {
        let host_name = self.host_name();
        let devices: Vec<cpal::Device> = match direction {
            DeviceDirection::Capture => self
                .host
                .input_devices()
                .map_err(|e| BridgeError::open_failed(host_name, e))?
                .collect(),
            DeviceDirection::Playback => self
                .host
                .output_devices()
                .map_err(|e| BridgeError::open_failed(host_name, e))?
                .collect(),
        };

        Ok(devices
            .into_iter()
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| fallback_name(direction, index));
                let id = device_id(host_name, direction, Some(index));
                let descriptor = match direction {
                    DeviceDirection::Capture => DeviceDescriptor::capture(id, name),
                    DeviceDirection::Playback => DeviceDescriptor::playback(id, name),
                };
                (descriptor, device)
            })
            .collect())
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

/// List capture devices of the default host.
pub fn list_capture_devices() -> Result<Vec<DeviceDescriptor>, BridgeError> {
    DeviceEnumerator::new().list_capture_devices()
}

/// List playback devices of the default host.
pub fn list_playback_devices() -> Result<Vec<DeviceDescriptor>, BridgeError> {
    DeviceEnumerator::new().list_playback_devices()
}

/// Identifier of an enumerated device, stable for one enumeration pass.
/// `None` names the host's default device.
fn device_id(host: &str, direction: DeviceDirection, index: Option<usize>) -> String {
    let dir = match direction {
        DeviceDirection::Capture => "in",
        DeviceDirection::Playback => "out",
    };
    match index {
        Some(index) => format!("{}:{}:{}", host.to_lowercase(), dir, index),
        None => format!("{}:{}:default", host.to_lowercase(), dir),
    }
}

fn fallback_name(direction: DeviceDirection, index: usize) -> String {
    match direction {
        DeviceDirection::Capture => format!("Input Device {}", index + 1),
        DeviceDirection::Playback => format!("Output Device {}", index + 1),
    }
}

fn take_device<T>(devices: Vec<(DeviceDescriptor, T)>, id: &str) -> Option<(DeviceDescriptor, T)> {
    devices.into_iter().find(|(d, _)| d.id == id)
}
