//! Render-side logic shared by every playback backend.
//!
//! A backend's real-time callback owns nothing but an `Arc<Renderer>`. Push
//! model backends call [`Renderer::fill`]; pull model backends call
//! [`Renderer::feed`] with a writer into the platform stream.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::BridgeStats;
use crate::models::config::TRANSFER_CHUNK_BYTES;
use crate::models::error::BridgeError;
use crate::processing::prebuffer::{GateDecision, PrebufferGate};
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::capture_source::StreamReader;

/// Where rendered audio comes from.
#[derive(Clone)]
pub enum RenderInput {
    /// The session's shared ring buffer.
    Ring(Arc<RingBuffer>),
    /// A capture stream that buffers internally.
    Stream(Arc<dyn StreamReader>),
}

impl RenderInput {
    fn available(&self) -> Result<usize, BridgeError> {
        match self {
            Self::Ring(ring) => Ok(ring.available()),
            Self::Stream(stream) => stream.available(),
        }
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize, BridgeError> {
        match self {
            Self::Ring(ring) => Ok(ring.pop(dest)),
            Self::Stream(stream) => stream.read(dest),
        }
    }
}

/// Number of bytes a pull-model sink should feed for one notification.
///
/// When the platform reports a larger total demand than the increment, feed
/// up to twice the increment to build a little headroom.
pub fn feed_goal(additional: usize, total: usize) -> usize {
    if total > 0 && additional < total {
        total.min(additional * 2)
    } else {
        additional
    }
}

/// Produces output audio from a [`RenderInput`] under a [`PrebufferGate`].
pub struct Renderer {
    input: RenderInput,
    gate: PrebufferGate,
    stats: Arc<BridgeStats>,
    lost: Mutex<Option<BridgeError>>,
}

impl Renderer {
    pub fn new(input: RenderInput, prebuffer_bytes: usize, stats: Arc<BridgeStats>) -> Self {
        Self {
            input,
            gate: PrebufferGate::new(prebuffer_bytes),
            stats,
            lost: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &PrebufferGate {
        &self.gate
    }

    /// Push model: fill `out` completely with audio or silence.
    pub fn fill(&self, out: &mut [u8]) {
        if out.is_empty() {
            return;
        }

        let available = match self.input.available() {
            Ok(n) => n,
            Err(e) => {
                out.fill(0);
                self.mark_lost(e);
                return;
            }
        };

        if self.gate.decide(available) == GateDecision::Silence {
            out.fill(0);
            self.stats.record_silence();
            if available == 0 {
                self.stats.record_underflow();
            }
            return;
        }

        let read = match self.input.read(out) {
            Ok(n) => n,
            Err(e) => {
                out.fill(0);
                self.mark_lost(e);
                return;
            }
        };
        self.stats.record_rendered(read);

        if read < out.len() {
            out[read..].fill(0);
            self.stats.record_underflow();
            log::debug!(
                "partial buffer: {}",
                BridgeError::BufferUnderflow {
                    requested: out.len(),
                    available: read
                }
            );
        }
    }

    /// Pull model: feed the platform stream through `write`.
    ///
    /// `additional` is the increment the platform asked for, `total` its
    /// overall demand (pass `additional` again when the platform has no such
    /// notion). Ring input is padded with silence up to the goal; stream
    /// input feeds only what the capture stream holds. A failing `write` or
    /// stream read marks the sink lost and returns the error.
    pub fn feed<W>(&self, additional: usize, total: usize, mut write: W) -> Result<usize, BridgeError>
    where
        W: FnMut(&[u8]) -> Result<(), BridgeError>,
    {
        if additional == 0 {
            return Ok(0);
        }

        let result = self.feed_inner(feed_goal(additional, total), &mut write);
        if let Err(ref e) = result {
            self.mark_lost(e.clone());
        }
        result
    }

    fn feed_inner(
        &self,
        goal: usize,
        write: &mut dyn FnMut(&[u8]) -> Result<(), BridgeError>,
    ) -> Result<usize, BridgeError> {
        let mut chunk = [0u8; TRANSFER_CHUNK_BYTES];
        let available = self.input.available()?;

        if self.gate.decide(available) == GateDecision::Silence {
            self.stats.record_silence();
            if available == 0 {
                self.stats.record_underflow();
            }
            write_silence(goal, &mut chunk, write)?;
            return Ok(goal);
        }

        let mut fed = 0;
        while fed < goal {
            let want = (goal - fed).min(TRANSFER_CHUNK_BYTES);
            let got = self.input.read(&mut chunk[..want])?;
            if got == 0 {
                break;
            }
            write(&chunk[..got])?;
            fed += got;
        }
        self.stats.record_rendered(fed);

        if fed < goal && matches!(self.input, RenderInput::Ring(_)) {
            self.stats.record_underflow();
            log::debug!(
                "partial buffer: {}",
                BridgeError::BufferUnderflow {
                    requested: goal,
                    available: fed
                }
            );
            write_silence(goal - fed, &mut chunk, write)?;
            fed = goal;
        }

        Ok(fed)
    }

    /// Record that the output device is gone.
    ///
    /// Safe to call from the render context or a backend's error callback;
    /// the control context picks it up on its next `pump`. The first reason
    /// wins. Nothing is logged here; the controller logs the cause when it
    /// closes the session.
    pub fn mark_lost(&self, error: BridgeError) {
        let mut lost = self.lost.lock();
        if lost.is_none() {
            *lost = Some(error);
        }
    }

    pub fn lost(&self) -> Option<BridgeError> {
        self.lost.lock().clone()
    }
}

fn write_silence(
    mut len: usize,
    chunk: &mut [u8],
    write: &mut dyn FnMut(&[u8]) -> Result<(), BridgeError>,
) -> Result<(), BridgeError> {
    chunk.fill(0);
    while len > 0 {
        let n = len.min(chunk.len());
        write(&chunk[..n])?;
        len -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn ring_renderer(capacity: usize, prebuffer: usize) -> (Renderer, Arc<RingBuffer>) {
        let ring = Arc::new(RingBuffer::new(capacity));
        let renderer = Renderer::new(
            RenderInput::Ring(Arc::clone(&ring)),
            prebuffer,
            Arc::new(BridgeStats::default()),
        );
        (renderer, ring)
    }

    struct QueueStream {
        bytes: Mutex<VecDeque<u8>>,
        broken: bool,
    }

    impl StreamReader for QueueStream {
        fn available(&self) -> Result<usize, BridgeError> {
            if self.broken {
                return Err(BridgeError::StreamReadFailed("device removed".into()));
            }
            Ok(self.bytes.lock().len())
        }

        fn read(&self, dest: &mut [u8]) -> Result<usize, BridgeError> {
            let mut bytes = self.bytes.lock();
            let n = dest.len().min(bytes.len());
            for (slot, byte) in dest.iter_mut().zip(bytes.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    fn stream_renderer(data: &[u8], prebuffer: usize, broken: bool) -> Renderer {
        let stream = Arc::new(QueueStream {
            bytes: Mutex::new(data.iter().copied().collect()),
            broken,
        });
        Renderer::new(
            RenderInput::Stream(stream),
            prebuffer,
            Arc::new(BridgeStats::default()),
        )
    }

    #[test]
    fn feed_goal_caps_prefill_at_twice_the_increment() {
        assert_eq!(feed_goal(1024, 1024), 1024);
        assert_eq!(feed_goal(1024, 0), 1024);
        assert_eq!(feed_goal(1024, 1500), 1500);
        assert_eq!(feed_goal(1024, 8192), 2048);
    }

    #[test]
    fn fill_is_silent_while_prebuffering() {
        let (renderer, ring) = ring_renderer(64 * 1024, 8192);
        ring.push(&[5u8; 4096]).unwrap();

        let mut out = [0xFFu8; 1024];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(ring.available(), 4096);
        assert!(!renderer.gate().is_filled());
    }

    #[test]
    fn fill_plays_once_threshold_reached_and_pads_shortfall() {
        let (renderer, ring) = ring_renderer(64 * 1024, 8192);
        ring.push(&[5u8; 8192]).unwrap();

        let mut out = [0u8; 4096];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&b| b == 5));
        assert!(renderer.gate().is_filled());

        let mut out = [0xFFu8; 6000];
        renderer.fill(&mut out);
        assert!(out[..4096].iter().all(|&b| b == 5));
        assert!(out[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fill_rearms_gate_on_empty_ring() {
        let (renderer, ring) = ring_renderer(64 * 1024, 8192);
        ring.push(&[1u8; 8192]).unwrap();
        let mut out = [0u8; 8192];
        renderer.fill(&mut out);

        renderer.fill(&mut out);
        assert!(!renderer.gate().is_filled());

        ring.push(&[2u8; 100]).unwrap();
        let mut out = [0xFFu8; 64];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(ring.available(), 100);
    }

    #[test]
    fn feed_from_ring_pads_to_goal() {
        let (renderer, ring) = ring_renderer(64 * 1024, 16);
        ring.push(&[9u8; 5000]).unwrap();

        let mut sink = Vec::new();
        let fed = renderer
            .feed(6000, 6000, |chunk| {
                sink.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();

        assert_eq!(fed, 6000);
        assert_eq!(sink.len(), 6000);
        assert!(sink[..5000].iter().all(|&b| b == 9));
        assert!(sink[5000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn feed_from_stream_stops_when_stream_is_dry() {
        let renderer = stream_renderer(&[4u8; 3000], 1024, false);
        let mut sink = Vec::new();
        let fed = renderer
            .feed(8192, 8192, |chunk| {
                sink.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(fed, 3000);
        assert_eq!(sink, vec![4u8; 3000]);
    }

    #[test]
    fn feed_writes_silence_while_prebuffering() {
        let renderer = stream_renderer(&[4u8; 100], 1024, false);
        let mut sink = Vec::new();
        renderer
            .feed(512, 512, |chunk| {
                sink.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(sink, vec![0u8; 512]);
    }

    #[test]
    fn failed_write_marks_sink_lost() {
        let (renderer, ring) = ring_renderer(1024, 0);
        ring.push(&[1u8; 256]).unwrap();

        let err = renderer
            .feed(256, 256, |_| Err(BridgeError::SinkWriteFailed("stream destroyed".into())))
            .unwrap_err();
        assert_eq!(err, BridgeError::SinkWriteFailed("stream destroyed".into()));
        assert_eq!(renderer.lost(), Some(err));
    }

    #[test]
    fn broken_stream_marks_sink_lost_during_fill() {
        let renderer = stream_renderer(&[], 0, true);
        let mut out = [0xFFu8; 32];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert!(matches!(
            renderer.lost(),
            Some(BridgeError::StreamReadFailed(_))
        ));
    }

    #[test]
    fn first_loss_reason_is_kept() {
        let (renderer, _) = ring_renderer(16, 0);
        renderer.mark_lost(BridgeError::Disconnected("unplugged".into()));
        renderer.mark_lost(BridgeError::SinkWriteFailed("later".into()));
        assert_eq!(
            renderer.lost(),
            Some(BridgeError::Disconnected("unplugged".into()))
        );
    }

    #[test]
    fn concurrent_losses_keep_a_single_reason() {
        let (renderer, _) = ring_renderer(16, 0);
        let renderer = Arc::new(renderer);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let renderer = Arc::clone(&renderer);
                std::thread::spawn(move || {
                    renderer.mark_lost(BridgeError::Disconnected(format!("context {}", i)));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let Some(BridgeError::Disconnected(reason)) = renderer.lost() else {
            panic!("loss was not recorded");
        };
        assert!(reason.starts_with("context "));
        assert_eq!(renderer.lost(), Some(BridgeError::Disconnected(reason)));
    }
}
