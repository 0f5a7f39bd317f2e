use std::sync::Arc;

use crate::models::audio_models::{BridgeStats, DeviceDescriptor};
use crate::models::error::BridgeError;
use crate::processing::ring_buffer::RingBuffer;

/// Which capture strategy a source implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    /// USB transfers complete in the USB library's event context and push
    /// straight into the ring buffer.
    Isochronous,
    /// The platform queues captured audio; `drain` moves it into the ring
    /// buffer on the host's cadence.
    Polled,
    /// The platform stream buffers internally and the sink reads it through
    /// [`StreamReader`]; the ring buffer is unused.
    Stream,
}

/// Read side of a self-buffering capture stream.
///
/// Called from the render context, so neither method may block on I/O.
pub trait StreamReader: Send + Sync {
    /// Bytes ready to read. An error means the capture device is gone.
    fn available(&self) -> Result<usize, BridgeError>;

    /// Move up to `dest.len()` bytes into `dest`, returning the count.
    fn read(&self, dest: &mut [u8]) -> Result<usize, BridgeError>;
}

/// Interface for the M8 capture path.
///
/// Implemented by:
/// - `IsochronousCapture` (libusb isochronous endpoint)
/// - `PolledCapture` (cpal input drained by `pump`)
/// - `StreamCapture` (cpal input read by the sink)
///
/// Sources are opened by an [`AudioPlatform`](super::audio_platform::AudioPlatform)
/// and driven from the host's control context only.
pub trait CaptureSource {
    fn kind(&self) -> CaptureKind;

    /// The device backing this source.
    fn device_info(&self) -> DeviceDescriptor;

    /// Start delivering audio into `buffer`.
    fn start(&mut self, buffer: Arc<RingBuffer>, stats: Arc<BridgeStats>) -> Result<(), BridgeError>;

    fn pause(&mut self) -> Result<(), BridgeError>;

    fn resume(&mut self) -> Result<(), BridgeError>;

    /// Move everything the platform has queued into the ring buffer.
    ///
    /// Returns the number of bytes moved. Only polled sources queue audio;
    /// the default does nothing. An error means the capture device is gone
    /// and the session cannot continue.
    fn drain(&mut self) -> Result<usize, BridgeError> {
        Ok(0)
    }

    /// The reader a pull-model sink should render from, for stream sources.
    fn stream_reader(&self) -> Option<Arc<dyn StreamReader>> {
        None
    }

    /// Stop capturing and release the device.
    ///
    /// Must not return while any capture callback can still run: the
    /// session frees the ring buffer right after.
    fn stop(&mut self);
}
