use crate::models::config::BridgeConfig;
use crate::models::error::BridgeError;
use crate::traits::capture_source::CaptureSource;
use crate::traits::playback_sink::PlaybackSink;

/// Opens capture sources and playback sinks for a session.
///
/// The controller calls this once per `initialize`, capture first. Which
/// concrete source and sink come back is the platform's decision, made at
/// runtime from `config` and whatever the platform can probe.
pub trait AudioPlatform {
    /// Discover and open the M8 capture device.
    ///
    /// Returns `DeviceNotFound` when no capture device matches and
    /// `DeviceOpenFailed` when one matches but cannot be opened.
    fn open_capture(&mut self, config: &BridgeConfig) -> Result<Box<dyn CaptureSource>, BridgeError>;

    /// Discover and open the output device named by
    /// `config.output_device_name`, or the default output.
    fn open_sink(&mut self, config: &BridgeConfig) -> Result<Box<dyn PlaybackSink>, BridgeError>;
}
