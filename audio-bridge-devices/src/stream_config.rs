//! Stream configuration and sample conversion shared by the cpal backends.
//!
//! The bridge moves interleaved signed 16-bit little-endian PCM. Devices
//! that run in another sample format are converted at the callback edge.

use cpal::traits::DeviceTrait;
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SupportedBufferSize,
    SupportedStreamConfig, SupportedStreamConfigRange,
};

use audio_bridge_core::models::audio_models::DeviceDirection;
use audio_bridge_core::models::config::{BridgeConfig, DEFAULT_BUFFER_FRAMES};
use audio_bridge_core::models::error::BridgeError;

/// A resolved stream setup for one device.
#[derive(Debug, Clone)]
pub struct StreamSetup {
    pub config: cpal::StreamConfig,
    pub sample_format: SampleFormat,
}

impl StreamSetup {
    /// Pick a configuration `device` supports at the bridge's rate and
    /// channel count, preferring native 16-bit samples.
    pub fn resolve(
        device: &cpal::Device,
        device_name: &str,
        direction: DeviceDirection,
        bridge: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let ranges: Vec<SupportedStreamConfigRange> = match direction {
            DeviceDirection::Capture => device
                .supported_input_configs()
                .map_err(|e| BridgeError::open_failed(device_name, e))?
                .collect(),
            DeviceDirection::Playback => device
                .supported_output_configs()
                .map_err(|e| BridgeError::open_failed(device_name, e))?
                .collect(),
        };

        let supported = select_config(ranges, bridge.channels, bridge.sample_rate).ok_or_else(|| {
            BridgeError::open_failed(
                device_name,
                format!(
                    "no configuration for {} Hz, {} channels",
                    bridge.sample_rate, bridge.channels
                ),
            )
        })?;

        let mut config = supported.config();
        config.buffer_size = buffer_size(bridge.buffer_size_frames, supported.buffer_size());
        log::debug!(
            "{}: {} Hz, {} channels, {:?}, buffer {:?}",
            device_name,
            config.sample_rate.0,
            config.channels,
            supported.sample_format(),
            config.buffer_size
        );

        Ok(Self {
            config,
            sample_format: supported.sample_format(),
        })
    }
}

fn select_config(
    ranges: Vec<SupportedStreamConfigRange>,
    channels: u16,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    ranges
        .into_iter()
        .filter(|r| r.channels() == channels)
        .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
        .min_by_key(|r| format_rank(r.sample_format()))
        .map(|r| r.with_sample_rate(SampleRate(sample_rate)))
}

/// Preference order of device sample formats; lower is better.
fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::I32 => 2,
        SampleFormat::U16 => 3,
        SampleFormat::F64 => 4,
        _ => 5,
    }
}

/// Device buffer size for a requested frame count.
///
/// `0` requests [`DEFAULT_BUFFER_FRAMES`]. A request the device cannot honor
/// falls back to the platform default.
fn buffer_size(frames: u32, supported: &SupportedBufferSize) -> BufferSize {
    let frames = if frames == 0 {
        DEFAULT_BUFFER_FRAMES
    } else {
        frames
    };
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        SupportedBufferSize::Range { min, max } => {
            log::warn!(
                "buffer of {} frames outside device range {}..={}, using platform default",
                frames,
                min,
                max
            );
            BufferSize::Default
        }
        SupportedBufferSize::Unknown => BufferSize::Default,
    }
}

/// Append `samples` to `out` as signed 16-bit little-endian bytes.
pub fn encode_i16le<T>(samples: &[T], out: &mut impl Extend<u8>)
where
    T: Sample,
    i16: FromSample<T>,
{
    out.extend(
        samples
            .iter()
            .flat_map(|&s| <i16 as Sample>::from_sample(s).to_le_bytes()),
    );
}

/// Decode signed 16-bit little-endian bytes into `out`.
///
/// Decodes `min(out.len(), bytes.len() / 2)` samples and returns that count.
pub fn decode_i16le<T>(bytes: &[u8], out: &mut [T]) -> usize
where
    T: Sample + FromSample<i16>,
{
    let mut written = 0;
    for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = T::from_sample(i16::from_le_bytes([src[0], src[1]]));
        written += 1;
    }
    written
}
