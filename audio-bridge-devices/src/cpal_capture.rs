//! M8 capture through a platform input device.
//!
//! The cpal input callback converts whatever the device delivers to 16-bit
//! little-endian PCM and appends it to a [`DeviceQueue`]. Two sources sit on
//! top of that queue:
//! - [`PolledCapture`] moves the queue into the ring buffer when the host
//!   calls `pump`.
//! - [`StreamCapture`] hands the queue to the sink, which reads it directly
//!   at render time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use audio_bridge_core::models::audio_models::{BridgeStats, DeviceDescriptor, DeviceDirection};
use audio_bridge_core::models::config::{BridgeConfig, TRANSFER_CHUNK_BYTES};
use audio_bridge_core::models::error::BridgeError;
use audio_bridge_core::processing::ring_buffer::RingBuffer;
use audio_bridge_core::traits::capture_source::{CaptureKind, CaptureSource, StreamReader};

use crate::device_enumerator::DeviceEnumerator;
use crate::stream_config::{encode_i16le, StreamSetup};

/// Write end of a [`DeviceQueue`], owned by the input callback.
///
/// Never locks: blocks are converted into a scratch buffer the writer owns
/// and pushed onto the SPSC ring in one piece.
pub struct QueueWriter {
    producer: HeapProd<u8>,
    scratch: Vec<u8>,
    dropped: Arc<AtomicU64>,
}

impl QueueWriter {
    /// Append one callback block of samples.
    ///
    /// Returns `false` if the block was dropped whole because the queue
    /// has no room for it.
    pub fn push_samples<T>(&mut self, samples: &[T]) -> bool
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let incoming = samples.len() * 2;
        if self.producer.vacant_len() < incoming {
            self.dropped.fetch_add(incoming as u64, Ordering::Relaxed);
            return false;
        }
        self.scratch.clear();
        encode_i16le(samples, &mut self.scratch);
        self.producer.push_slice(&self.scratch);
        true
    }
}

/// Captured bytes waiting to be drained, filled by a [`QueueWriter`].
///
/// Bounded: a callback block that does not fit is dropped whole. Device
/// loss is tracked apart from the bytes so readers see it immediately.
pub struct DeviceQueue {
    consumer: Mutex<HeapCons<u8>>,
    dropped: Arc<AtomicU64>,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl DeviceQueue {
    /// A queue holding at most `capacity` bytes, split into its two ends.
    pub fn new(capacity: usize) -> (QueueWriter, Arc<Self>) {
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        let dropped = Arc::new(AtomicU64::new(0));
        let writer = QueueWriter {
            producer,
            scratch: Vec::with_capacity(TRANSFER_CHUNK_BYTES),
            dropped: Arc::clone(&dropped),
        };
        let queue = Arc::new(Self {
            consumer: Mutex::new(consumer),
            dropped,
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        (writer, queue)
    }

    /// Move up to `dest.len()` bytes into `dest`.
    pub fn take(&self, dest: &mut [u8]) -> usize {
        self.consumer.lock().pop_slice(dest)
    }

    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.consumer.lock().clear();
    }

    /// Bytes dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record that the device is gone. The first reason wins.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            return;
        }
        *failure = Some(reason.into());
        self.failed.store(true, Ordering::Release);
    }

    pub fn failure(&self) -> Option<String> {
        if !self.failed.load(Ordering::Acquire) {
            return None;
        }
        self.failure.lock().clone()
    }
}

impl StreamReader for DeviceQueue {
    fn available(&self) -> Result<usize, BridgeError> {
        match self.failure() {
            Some(reason) => Err(BridgeError::StreamReadFailed(reason)),
            None => Ok(self.len()),
        }
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize, BridgeError> {
        if let Some(reason) = self.failure() {
            return Err(BridgeError::StreamReadFailed(reason));
        }
        Ok(self.take(dest))
    }
}

/// An open cpal input stream feeding a [`DeviceQueue`].
///
/// The stream is built paused and only plays between `play` and `pause`.
struct CpalInput {
    device: DeviceDescriptor,
    stream: Option<cpal::Stream>,
    queue: Arc<DeviceQueue>,
}

impl CpalInput {
    fn open(enumerator: &DeviceEnumerator, config: &BridgeConfig, pattern: &str) -> Result<Self, BridgeError> {
        let (descriptor, device) = enumerator.find_capture(pattern)?;
        log::info!("found capture device: {}", descriptor.name);

        let setup = StreamSetup::resolve(&device, &descriptor.name, DeviceDirection::Capture, config)?;
        let (writer, queue) = DeviceQueue::new(config.ring_capacity);
        let stream =
            build_input_stream(&device, &descriptor.name, &setup, writer, Arc::clone(&queue))?;
        if let Err(e) = stream.pause() {
            log::debug!("{}: input stream cannot start paused: {}", descriptor.name, e);
        }

        Ok(Self {
            device: descriptor,
            stream: Some(stream),
            queue,
        })
    }

    fn play(&self) -> Result<(), BridgeError> {
        match self.stream {
            Some(ref stream) => stream
                .play()
                .map_err(|e| BridgeError::open_failed(&self.device.name, e)),
            None => Err(BridgeError::InvalidState("capture stream closed".into())),
        }
    }

    fn pause(&self) -> Result<(), BridgeError> {
        match self.stream {
            Some(ref stream) => stream.pause().map_err(|e| {
                BridgeError::InvalidState(format!("cannot pause {}: {}", self.device.name, e))
            }),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("{}: pause before close failed: {}", self.device.name, e);
            }
            drop(stream);
            self.queue.clear();
            let dropped = self.queue.dropped();
            if dropped > 0 {
                log::warn!("{}: capture queue dropped {} bytes", self.device.name, dropped);
            }
            log::debug!("closed capture device {}", self.device.name);
        }
    }
}

fn build_input_stream(
    device: &cpal::Device,
    device_name: &str,
    setup: &StreamSetup,
    writer: QueueWriter,
    queue: Arc<DeviceQueue>,
) -> Result<cpal::Stream, BridgeError> {
    let stream = match setup.sample_format {
        SampleFormat::I16 => input_stream::<i16>(device, setup, writer, queue),
        SampleFormat::F32 => input_stream::<f32>(device, setup, writer, queue),
        SampleFormat::I32 => input_stream::<i32>(device, setup, writer, queue),
        SampleFormat::U16 => input_stream::<u16>(device, setup, writer, queue),
        SampleFormat::F64 => input_stream::<f64>(device, setup, writer, queue),
        SampleFormat::I8 => input_stream::<i8>(device, setup, writer, queue),
        SampleFormat::U8 => input_stream::<u8>(device, setup, writer, queue),
        other => {
            return Err(BridgeError::open_failed(
                device_name,
                format!("unsupported sample format {:?}", other),
            ))
        }
    };
    stream.map_err(|e| BridgeError::open_failed(device_name, e))
}

fn input_stream<T>(
    device: &cpal::Device,
    setup: &StreamSetup,
    mut writer: QueueWriter,
    queue: Arc<DeviceQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device.build_input_stream(
        &setup.config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            writer.push_samples(data);
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("capture device lost: device no longer available");
                queue.fail("device no longer available");
            }
            other => log::warn!("audio input stream error: {}", other),
        },
        None,
    )
}

/// Capture from a queued platform input, drained into the ring buffer by
/// the host's `pump`.
pub struct PolledCapture {
    input: CpalInput,
    buffer: Option<Arc<RingBuffer>>,
    stats: Option<Arc<BridgeStats>>,
}

impl PolledCapture {
    /// Open the capture device whose name contains `pattern`.
    pub fn open(enumerator: &DeviceEnumerator, config: &BridgeConfig, pattern: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            input: CpalInput::open(enumerator, config, pattern)?,
            buffer: None,
            stats: None,
        })
    }

    pub fn queue(&self) -> &Arc<DeviceQueue> {
        &self.input.queue
    }
}

impl CaptureSource for PolledCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Polled
    }

    fn device_info(&self) -> DeviceDescriptor {
        self.input.device.clone()
    }

    fn start(&mut self, buffer: Arc<RingBuffer>, stats: Arc<BridgeStats>) -> Result<(), BridgeError> {
        self.buffer = Some(buffer);
        self.stats = Some(stats);
        self.input.play()
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        self.input.pause()
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        self.input.play()
    }

    fn drain(&mut self) -> Result<usize, BridgeError> {
        let (Some(buffer), Some(stats)) = (self.buffer.as_ref(), self.stats.as_ref()) else {
            return Ok(0);
        };
        drain_queue(&self.input.queue, buffer, stats)
    }

    fn stop(&mut self) {
        self.input.close();
        self.buffer = None;
    }
}

impl Drop for PolledCapture {
    fn drop(&mut self) {
        self.input.close();
    }
}

/// Move everything queued into `buffer`, one chunk at a time.
///
/// A chunk that does not fit in the ring buffer is dropped whole. Fails
/// once the input device is gone.
fn drain_queue(
    queue: &DeviceQueue,
    buffer: &RingBuffer,
    stats: &BridgeStats,
) -> Result<usize, BridgeError> {
    if let Some(reason) = queue.failure() {
        return Err(BridgeError::StreamReadFailed(reason));
    }
    let mut chunk = [0u8; TRANSFER_CHUNK_BYTES];
    let mut moved = 0;
    while !queue.is_empty() {
        let got = queue.take(&mut chunk);
        if got == 0 {
            break;
        }
        match buffer.push(&chunk[..got]) {
            Ok(n) => {
                moved += n;
                stats.record_captured(n);
            }
            Err(e) => {
                stats.record_overflow(got);
                log::debug!("{}", e);
            }
        }
    }
    Ok(moved)
}

/// Capture from a self-buffering platform input, read by the sink at render
/// time. The ring buffer is not used.
pub struct StreamCapture {
    input: CpalInput,
}

impl StreamCapture {
    /// Open the capture device whose name contains `pattern`.
    pub fn open(enumerator: &DeviceEnumerator, config: &BridgeConfig, pattern: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            input: CpalInput::open(enumerator, config, pattern)?,
        })
    }
}

impl CaptureSource for StreamCapture {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Stream
    }

    fn device_info(&self) -> DeviceDescriptor {
        self.input.device.clone()
    }

    fn start(&mut self, _buffer: Arc<RingBuffer>, _stats: Arc<BridgeStats>) -> Result<(), BridgeError> {
        self.input.play()
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        self.input.pause()
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        self.input.play()
    }

    fn stream_reader(&self) -> Option<Arc<dyn StreamReader>> {
        Some(Arc::clone(&self.input.queue) as Arc<dyn StreamReader>)
    }

    fn stop(&mut self) {
        self.input.close();
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        self.input.close();
    }
}
