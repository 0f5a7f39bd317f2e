//! # audio-bridge-devices
//!
//! Device backends for the M8 audio bridge.
//!
//! Provides:
//! - `IsochronousCapture`: M8 audio straight from its USB isochronous endpoint (libusb, `usb` feature)
//! - `PolledCapture`: M8 audio from the platform capture device, drained by `pump`
//! - `StreamCapture`: M8 audio from the platform capture device, read by the sink
//! - `CpalPlaybackSink`: host output in push or pull delivery
//! - `DeviceEnumerator`: capture and playback device discovery via cpal
//! - `DevicePlatform`: the `AudioPlatform` that picks among the above per session
//!
//! ## Usage
//! ```ignore
//! use audio_bridge_core::{AudioBridgeController, BridgeConfig};
//! use audio_bridge_devices::DevicePlatform;
//!
//! let platform = DevicePlatform::new().with_usb_handle(m8_handle);
//! let mut bridge = AudioBridgeController::new(platform, BridgeConfig::default());
//! bridge.initialize(None, 0)?;
//! loop {
//!     bridge.pump()?;
//! }
//! ```

pub mod cpal_capture;
pub mod cpal_output;
pub mod device_enumerator;
pub mod platform;
pub mod stream_config;
#[cfg(feature = "usb")]
pub mod usb_iso;

pub use cpal_capture::{DeviceQueue, PolledCapture, QueueWriter, StreamCapture};
pub use cpal_output::CpalPlaybackSink;
pub use device_enumerator::{list_capture_devices, list_playback_devices, DeviceEnumerator};
pub use platform::{resolve_backend, DevicePlatform};
#[cfg(feature = "usb")]
pub use usb_iso::{IsochronousCapture, SharedUsbHandle};
