use serde::{Deserialize, Serialize};

/// Substring every M8 capture device name contains. Matched case-sensitively.
pub const CAPTURE_DEVICE_PATTERN: &str = "M8";

/// Frames per device buffer when the host requests `0`.
pub const DEFAULT_BUFFER_FRAMES: u32 = 1024;

/// Largest chunk moved per copy when draining a capture queue or feeding a
/// pull-model sink.
pub const TRANSFER_CHUNK_BYTES: usize = 4096;

/// Log only the first of every this many consecutive packet errors.
pub const ERROR_LOG_INTERVAL: u64 = 100;

/// Which capture strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Probe the platform at session start.
    Auto,
    /// Raw PCM from the M8's USB audio endpoint.
    Isochronous,
    /// Platform capture device drained by `pump`.
    Polled,
    /// Self-buffering platform capture stream drained by the sink.
    Stream,
}

/// How the platform output asks for audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryModel {
    /// Platform calls a fill function with a requested length.
    Push,
    /// Platform reports how much more it wants; the bridge feeds it.
    Pull,
}

/// USB audio endpoint layout of the M8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbEndpointConfig {
    /// Isochronous IN endpoint address.
    pub endpoint: u8,
    /// Audio streaming interface number.
    pub interface: u8,
    /// Alternate setting that enables the streaming endpoint.
    pub alt_setting: u8,
    /// Number of transfers kept in flight.
    pub slot_count: usize,
    /// Bytes per isochronous packet.
    pub packet_size: usize,
    /// Packets per transfer.
    pub packets_per_transfer: usize,
}

impl UsbEndpointConfig {
    /// Size of one transfer slot's buffer.
    pub fn transfer_size(&self) -> usize {
        self.packet_size * self.packets_per_transfer
    }
}

impl Default for UsbEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: 0x85,
            interface: 4,
            alt_setting: 1,
            slot_count: 64,
            packet_size: 180,
            packets_per_transfer: 2,
        }
    }
}

/// Configuration for an audio bridge session.
///
/// Every field has a default, so a partial document from the host's config
/// layer deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Preferred output device, matched case-insensitively as a substring.
    /// `None` selects the platform default output.
    pub output_device_name: Option<String>,

    /// Device buffer size in frames; `0` selects [`DEFAULT_BUFFER_FRAMES`].
    pub buffer_size_frames: u32,

    /// Sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Interleaved channel count (default: 2). Samples are signed 16-bit LE.
    pub channels: u16,

    /// Ring buffer capacity in bytes (default: 256 KiB).
    pub ring_capacity: usize,

    /// Bytes that must be buffered before playback starts (default: 8 KiB).
    pub prebuffer_bytes: usize,

    pub capture_backend: CaptureBackend,

    pub delivery: DeliveryModel,

    pub usb: UsbEndpointConfig,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.ring_capacity == 0 {
            return Err("ring capacity must be positive".into());
        }
        if self.prebuffer_bytes > self.ring_capacity {
            return Err(format!(
                "prebuffer of {} bytes exceeds ring capacity of {} bytes",
                self.prebuffer_bytes, self.ring_capacity
            ));
        }
        if self.usb.slot_count == 0 || self.usb.transfer_size() == 0 {
            return Err("usb transfers must have a nonzero size and count".into());
        }
        Ok(())
    }

    /// Buffer size in frames with the `0` default applied.
    pub fn effective_buffer_frames(&self) -> u32 {
        if self.buffer_size_frames == 0 {
            DEFAULT_BUFFER_FRAMES
        } else {
            self.buffer_size_frames
        }
    }

    /// Bytes per interleaved frame of signed 16-bit samples.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    /// Returns a copy with the per-call overrides of `initialize` applied.
    ///
    /// An explicit output name replaces the configured one; the buffer size
    /// always comes from the call.
    pub fn for_session(&self, output_device_name: Option<&str>, buffer_size_frames: u32) -> Self {
        let mut config = self.clone();
        if let Some(name) = output_device_name {
            config.output_device_name = Some(name.to_string());
        }
        config.buffer_size_frames = buffer_size_frames;
        config
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            output_device_name: None,
            buffer_size_frames: 0,
            sample_rate: 44100,
            channels: 2,
            ring_capacity: 256 * 1024,
            prebuffer_bytes: 8 * 1024,
            capture_backend: CaptureBackend::Auto,
            delivery: DeliveryModel::Push,
            usb: UsbEndpointConfig::default(),
        }
    }
}
