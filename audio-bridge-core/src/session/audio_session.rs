use std::sync::Arc;

use crate::models::audio_models::{BridgeStats, DeviceDescriptor};
use crate::models::config::BridgeConfig;
use crate::models::error::BridgeError;
use crate::processing::render::{RenderInput, Renderer};
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::audio_platform::AudioPlatform;
use crate::traits::capture_source::{CaptureKind, CaptureSource};
use crate::traits::playback_sink::PlaybackSink;

/// One open capture → ring buffer → playback chain.
///
/// ```text
/// [CaptureSource] → [RingBuffer] → [Renderer + PrebufferGate] → [PlaybackSink]
///        └──────── (stream sources) ───────┘
/// ```
///
/// Dropping the session tears it down in the only safe order: capture
/// first (waiting out in-flight completions), then the sink, then the ring
/// buffer.
pub struct AudioSession {
    capture: Box<dyn CaptureSource>,
    sink: Box<dyn PlaybackSink>,
    renderer: Arc<Renderer>,
    buffer: Arc<RingBuffer>,
    stats: Arc<BridgeStats>,
    capture_device: DeviceDescriptor,
    output_device: DeviceDescriptor,
    paused: bool,
    closed: bool,
}

impl AudioSession {
    /// Open capture then sink, allocate the ring buffer and start both.
    ///
    /// Anything opened before a failing step is stopped before the error is
    /// returned, so a failed open holds no devices.
    pub fn open<P>(platform: &mut P, config: &BridgeConfig) -> Result<Self, BridgeError>
    where
        P: AudioPlatform + ?Sized,
    {
        let mut capture = platform.open_capture(config)?;
        let capture_device = capture.device_info();
        log::info!("capture device opened: {}", capture_device.name);

        let mut sink = match platform.open_sink(config) {
            Ok(sink) => sink,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };
        let output_device = sink.device_info();
        log::info!("output device opened: {}", output_device.name);

        let stats = Arc::new(BridgeStats::default());
        let buffer = Arc::new(RingBuffer::new(config.ring_capacity));
        let input = match capture.stream_reader() {
            Some(reader) => RenderInput::Stream(reader),
            None => RenderInput::Ring(Arc::clone(&buffer)),
        };
        let renderer = Arc::new(Renderer::new(
            input,
            config.prebuffer_bytes,
            Arc::clone(&stats),
        ));

        if let Err(e) = sink.start(Arc::clone(&renderer)) {
            sink.stop();
            capture.stop();
            return Err(e);
        }

        log::debug!("starting capture");
        if let Err(e) = capture.start(Arc::clone(&buffer), Arc::clone(&stats)) {
            capture.stop();
            sink.stop();
            return Err(e);
        }

        Ok(Self {
            capture,
            sink,
            renderer,
            buffer,
            stats,
            capture_device,
            output_device,
            paused: false,
            closed: false,
        })
    }

    /// Pause capture and sink together.
    pub fn pause(&mut self) -> Result<(), BridgeError> {
        if self.paused {
            return Ok(());
        }
        self.capture.pause()?;
        if let Err(e) = self.sink.pause() {
            if let Err(resume_err) = self.capture.resume() {
                log::warn!("could not resume capture after failed pause: {}", resume_err);
            }
            return Err(e);
        }
        self.paused = true;
        Ok(())
    }

    /// Resume sink and capture together.
    pub fn resume(&mut self) -> Result<(), BridgeError> {
        if !self.paused {
            return Ok(());
        }
        self.sink.resume()?;
        if let Err(e) = self.capture.resume() {
            if let Err(pause_err) = self.sink.pause() {
                log::warn!("could not pause output after failed resume: {}", pause_err);
            }
            return Err(e);
        }
        self.paused = false;
        Ok(())
    }

    /// Drain a polled capture source into the ring buffer.
    ///
    /// Fails if the capture device was lost.
    pub fn drain(&mut self) -> Result<usize, BridgeError> {
        if self.paused || self.capture.kind() != CaptureKind::Polled {
            return Ok(0);
        }
        self.capture.drain()
    }

    /// The reason the output was lost, if it was.
    pub fn lost(&self) -> Option<BridgeError> {
        self.renderer.lost()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_playing(&self) -> bool {
        self.renderer.gate().is_filled()
    }

    pub fn capture_kind(&self) -> CaptureKind {
        self.capture.kind()
    }

    pub fn capture_device(&self) -> &DeviceDescriptor {
        &self.capture_device
    }

    pub fn output_device(&self) -> &DeviceDescriptor {
        &self.output_device
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Stop capture, then the sink; the ring buffer is freed when the
    /// session is dropped.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.capture.stop();
        self.sink.stop();
        self.buffer.clear();
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
