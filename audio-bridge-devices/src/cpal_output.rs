//! Host audio output through cpal.
//!
//! cpal always calls back with a buffer to fill. The push model hands that
//! buffer straight to [`Renderer::fill`]. The pull model keeps a small
//! pending queue that stands in for the platform stream: each callback asks
//! the renderer to feed only what the queue lacks, then plays from the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};

use audio_bridge_core::models::audio_models::{DeviceDescriptor, DeviceDirection};
use audio_bridge_core::models::config::{BridgeConfig, DeliveryModel};
use audio_bridge_core::models::error::BridgeError;
use audio_bridge_core::processing::render::Renderer;
use audio_bridge_core::traits::playback_sink::PlaybackSink;

use crate::device_enumerator::DeviceEnumerator;
use crate::stream_config::{decode_i16le, StreamSetup};

/// Playback on a cpal output device.
pub struct CpalPlaybackSink {
    model: DeliveryModel,
    descriptor: DeviceDescriptor,
    device: cpal::Device,
    setup: StreamSetup,
    stream: Option<cpal::Stream>,
}

impl CpalPlaybackSink {
    /// Open the output device matching `config.output_device_name`, or the
    /// default output.
    pub fn open(enumerator: &DeviceEnumerator, config: &BridgeConfig) -> Result<Self, BridgeError> {
        let (descriptor, device) = enumerator.find_playback(config.output_device_name.as_deref())?;
        let setup = StreamSetup::resolve(&device, &descriptor.name, DeviceDirection::Playback, config)?;
        log::info!(
            "current audio host is {} and device {}",
            enumerator.host_name(),
            descriptor.name
        );

        Ok(Self {
            model: config.delivery,
            descriptor,
            device,
            setup,
            stream: None,
        })
    }

    fn build_stream(&self, renderer: Arc<Renderer>) -> Result<cpal::Stream, BridgeError> {
        let name = &self.descriptor.name;
        let stream = match self.setup.sample_format {
            SampleFormat::I16 => self.output_stream::<i16>(renderer),
            SampleFormat::F32 => self.output_stream::<f32>(renderer),
            SampleFormat::I32 => self.output_stream::<i32>(renderer),
            SampleFormat::U16 => self.output_stream::<u16>(renderer),
            SampleFormat::F64 => self.output_stream::<f64>(renderer),
            SampleFormat::I8 => self.output_stream::<i8>(renderer),
            SampleFormat::U8 => self.output_stream::<u8>(renderer),
            other => {
                return Err(BridgeError::open_failed(
                    name,
                    format!("unsupported sample format {:?}", other),
                ))
            }
        };
        stream.map_err(|e| BridgeError::open_failed(name, e))
    }

    fn output_stream<T>(&self, renderer: Arc<Renderer>) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<i16>,
    {
        let on_error = {
            let renderer = Arc::clone(&renderer);
            move |err: cpal::StreamError| match err {
                cpal::StreamError::DeviceNotAvailable => renderer.mark_lost(
                    BridgeError::Disconnected("output device no longer available".into()),
                ),
                other => log::warn!("audio output stream error: {}", other),
            }
        };

        match self.model {
            DeliveryModel::Push => {
                let mut scratch = Vec::new();
                self.device.build_output_stream(
                    &self.setup.config,
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len() * 2, 0);
                        renderer.fill(&mut scratch);
                        decode_i16le(&scratch, data);
                    },
                    on_error,
                    None,
                )
            }
            DeliveryModel::Pull => {
                let mut pending = PullQueue::default();
                let mut scratch = Vec::new();
                self.device.build_output_stream(
                    &self.setup.config,
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len() * 2, 0);
                        pending.render(&renderer, &mut scratch);
                        decode_i16le(&scratch, data);
                    },
                    on_error,
                    None,
                )
            }
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn model(&self) -> DeliveryModel {
        self.model
    }

    fn device_info(&self) -> DeviceDescriptor {
        self.descriptor.clone()
    }

    fn start(&mut self, renderer: Arc<Renderer>) -> Result<(), BridgeError> {
        if self.stream.is_some() {
            return Err(BridgeError::InvalidState("output already started".into()));
        }
        let stream = self.build_stream(renderer)?;
        stream
            .play()
            .map_err(|e| BridgeError::open_failed(&self.descriptor.name, e))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        match self.stream {
            Some(ref stream) => stream.pause().map_err(|e| {
                BridgeError::InvalidState(format!("cannot pause {}: {}", self.descriptor.name, e))
            }),
            None => Ok(()),
        }
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        match self.stream {
            Some(ref stream) => stream
                .play()
                .map_err(|e| BridgeError::open_failed(&self.descriptor.name, e)),
            None => Err(BridgeError::InvalidState("output not started".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::info!("closing audio device");
            if let Err(e) = stream.pause() {
                log::debug!("{}: pause before close failed: {}", self.descriptor.name, e);
            }
            drop(stream);
        }
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bytes the renderer has fed but the device has not played yet.
#[derive(Debug, Default)]
struct PullQueue {
    bytes: VecDeque<u8>,
}

impl PullQueue {
    /// Fill `out` from the queue after asking the renderer for the shortfall.
    ///
    /// Whatever the renderer cannot supply is played as silence. After a
    /// feed error the renderer has already marked the sink lost; the queue
    /// is discarded.
    fn render(&mut self, renderer: &Renderer, out: &mut [u8]) {
        let wanted = out.len();
        let additional = wanted.saturating_sub(self.bytes.len());
        if additional > 0 {
            let bytes = &mut self.bytes;
            let fed = renderer.feed(additional, wanted, |chunk| {
                bytes.extend(chunk.iter().copied());
                Ok(())
            });
            if fed.is_err() {
                self.bytes.clear();
            }
        }

        let n = wanted.min(self.bytes.len());
        for (slot, byte) in out.iter_mut().zip(self.bytes.drain(..n)) {
            *slot = byte;
        }
        out[n..].fill(0);
    }
}
