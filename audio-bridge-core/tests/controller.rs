use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use audio_bridge_core::{
    AudioBridgeController, AudioPlatform, BridgeConfig, BridgeDelegate, BridgeError, BridgeState,
    BridgeStats, CaptureKind, CaptureSource, DeliveryModel, DeviceDescriptor, PlaybackSink,
    Renderer, RingBuffer, StreamReader,
};

/// Records every device handle the mock platform hands out.
#[derive(Default)]
struct Ledger {
    capture_present: AtomicBool,
    sink_fails: AtomicBool,
    sink_start_fails: AtomicBool,
    capture_start_fails: AtomicBool,
    capture_lost: AtomicBool,
    captures_open: AtomicUsize,
    sinks_open: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
    ring: Mutex<Option<Weak<RingBuffer>>>,
    renderer: Mutex<Option<Weak<Renderer>>>,
    queued: Mutex<VecDeque<u8>>,
}

impl Ledger {
    fn new() -> Arc<Self> {
        let ledger = Self::default();
        ledger.capture_present.store(true, Ordering::SeqCst);
        Arc::new(ledger)
    }

    fn log(&self, event: &'static str) {
        self.events.lock().push(event);
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    fn handles_open(&self) -> usize {
        self.captures_open.load(Ordering::SeqCst) + self.sinks_open.load(Ordering::SeqCst)
    }

    fn ring_alive(&self) -> bool {
        self.ring
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some()
    }

    fn renderer(&self) -> Arc<Renderer> {
        self.renderer
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("sink was started")
    }

    fn queue(&self, bytes: &[u8]) {
        self.queued.lock().extend(bytes.iter().copied());
    }
}

struct MockPlatform {
    ledger: Arc<Ledger>,
    kind: CaptureKind,
}

impl AudioPlatform for MockPlatform {
    fn open_capture(&mut self, _: &BridgeConfig) -> Result<Box<dyn CaptureSource>, BridgeError> {
        if !self.ledger.capture_present.load(Ordering::SeqCst) {
            return Err(BridgeError::DeviceNotFound {
                pattern: "M8".into(),
            });
        }
        self.ledger.captures_open.fetch_add(1, Ordering::SeqCst);
        self.ledger.log("capture.open");
        Ok(Box::new(MockCapture {
            ledger: Arc::clone(&self.ledger),
            kind: self.kind,
            buffer: None,
            open: true,
        }))
    }

    fn open_sink(&mut self, config: &BridgeConfig) -> Result<Box<dyn PlaybackSink>, BridgeError> {
        if self.ledger.sink_fails.load(Ordering::SeqCst) {
            return Err(BridgeError::open_failed("Speakers", "device busy"));
        }
        self.ledger.sinks_open.fetch_add(1, Ordering::SeqCst);
        self.ledger.log("sink.open");
        Ok(Box::new(MockSink {
            ledger: Arc::clone(&self.ledger),
            model: config.delivery,
            open: true,
        }))
    }
}

struct MockCapture {
    ledger: Arc<Ledger>,
    kind: CaptureKind,
    buffer: Option<Arc<RingBuffer>>,
    open: bool,
}

impl CaptureSource for MockCapture {
    fn kind(&self) -> CaptureKind {
        self.kind
    }

    fn device_info(&self) -> DeviceDescriptor {
        DeviceDescriptor::capture("mock-in", "M8 Analog Stereo")
    }

    fn start(&mut self, buffer: Arc<RingBuffer>, _: Arc<BridgeStats>) -> Result<(), BridgeError> {
        *self.ledger.ring.lock() = Some(Arc::downgrade(&buffer));
        if self.ledger.capture_start_fails.load(Ordering::SeqCst) {
            return Err(BridgeError::open_failed("M8 Analog Stereo", "stream start refused"));
        }
        self.buffer = Some(buffer);
        self.ledger.log("capture.start");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        self.ledger.log("capture.pause");
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        self.ledger.log("capture.resume");
        Ok(())
    }

    fn drain(&mut self) -> Result<usize, BridgeError> {
        if self.ledger.capture_lost.load(Ordering::SeqCst) {
            return Err(BridgeError::StreamReadFailed("device no longer available".into()));
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(0);
        };
        let bytes: Vec<u8> = self.ledger.queued.lock().drain(..).collect();
        Ok(buffer.push(&bytes).unwrap_or(0))
    }

    fn stream_reader(&self) -> Option<Arc<dyn StreamReader>> {
        match self.kind {
            CaptureKind::Stream => Some(Arc::new(MockStream {
                ledger: Arc::clone(&self.ledger),
            })),
            _ => None,
        }
    }

    fn stop(&mut self) {
        if self.open {
            self.open = false;
            self.buffer = None;
            self.ledger.captures_open.fetch_sub(1, Ordering::SeqCst);
            self.ledger.log("capture.stop");
        }
    }
}

struct MockStream {
    ledger: Arc<Ledger>,
}

impl StreamReader for MockStream {
    fn available(&self) -> Result<usize, BridgeError> {
        Ok(self.ledger.queued.lock().len())
    }

    fn read(&self, dest: &mut [u8]) -> Result<usize, BridgeError> {
        let mut queued = self.ledger.queued.lock();
        let n = dest.len().min(queued.len());
        for (slot, byte) in dest.iter_mut().zip(queued.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct MockSink {
    ledger: Arc<Ledger>,
    model: DeliveryModel,
    open: bool,
}

impl PlaybackSink for MockSink {
    fn model(&self) -> DeliveryModel {
        self.model
    }

    fn device_info(&self) -> DeviceDescriptor {
        DeviceDescriptor::playback("mock-out", "Speakers")
    }

    fn start(&mut self, renderer: Arc<Renderer>) -> Result<(), BridgeError> {
        *self.ledger.renderer.lock() = Some(Arc::downgrade(&renderer));
        if self.ledger.sink_start_fails.load(Ordering::SeqCst) {
            return Err(BridgeError::open_failed("Speakers", "stream start refused"));
        }
        self.ledger.log("sink.start");
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BridgeError> {
        self.ledger.log("sink.pause");
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BridgeError> {
        self.ledger.log("sink.resume");
        Ok(())
    }

    fn stop(&mut self) {
        if self.open {
            self.open = false;
            self.ledger.sinks_open.fetch_sub(1, Ordering::SeqCst);
            self.ledger.log("sink.stop");
        }
    }
}

#[derive(Default)]
struct RecordingDelegate {
    states: Mutex<Vec<BridgeState>>,
    disconnects: Mutex<Vec<BridgeError>>,
}

impl BridgeDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: BridgeState) {
        self.states.lock().push(state);
    }

    fn on_disconnected(&self, error: &BridgeError) {
        self.disconnects.lock().push(error.clone());
    }
}

fn controller(kind: CaptureKind) -> (AudioBridgeController<MockPlatform>, Arc<Ledger>) {
    let ledger = Ledger::new();
    let platform = MockPlatform {
        ledger: Arc::clone(&ledger),
        kind,
    };
    let config = BridgeConfig {
        ring_capacity: 64 * 1024,
        prebuffer_bytes: 1024,
        ..Default::default()
    };
    (AudioBridgeController::new(platform, config), ledger)
}

#[test]
fn missing_capture_device_fails_and_holds_nothing() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    ledger.capture_present.store(false, Ordering::SeqCst);

    let err = bridge.initialize(None, 0).unwrap_err();
    assert!(matches!(err, BridgeError::DeviceNotFound { .. }));
    assert_eq!(bridge.state(), BridgeState::Uninitialized);
    assert!(!bridge.is_initialized());
    assert_eq!(ledger.handles_open(), 0);
    assert!(!ledger.ring_alive());
}

#[test]
fn sink_failure_releases_opened_capture() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    ledger.sink_fails.store(true, Ordering::SeqCst);

    let err = bridge.initialize(Some("Speakers"), 0).unwrap_err();
    assert!(matches!(err, BridgeError::DeviceOpenFailed { .. }));
    assert_eq!(ledger.handles_open(), 0);
    assert_eq!(ledger.events(), vec!["capture.open", "capture.stop"]);
    assert!(!bridge.is_initialized());
}

#[test]
fn sink_start_failure_stops_sink_then_capture() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    ledger.sink_start_fails.store(true, Ordering::SeqCst);

    let err = bridge.initialize(None, 0).unwrap_err();
    assert!(matches!(err, BridgeError::DeviceOpenFailed { .. }));
    assert_eq!(ledger.handles_open(), 0);
    assert_eq!(
        ledger.events(),
        vec!["capture.open", "sink.open", "sink.stop", "capture.stop"]
    );
    assert!(!ledger.ring_alive());
    assert!(!bridge.is_initialized());
}

#[test]
fn capture_start_failure_stops_capture_then_sink() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    ledger.capture_start_fails.store(true, Ordering::SeqCst);

    let err = bridge.initialize(None, 0).unwrap_err();
    assert!(matches!(err, BridgeError::DeviceOpenFailed { .. }));
    assert_eq!(ledger.handles_open(), 0);
    assert_eq!(
        ledger.events(),
        vec![
            "capture.open",
            "sink.open",
            "sink.start",
            "capture.stop",
            "sink.stop"
        ]
    );
    assert!(!ledger.ring_alive());
    assert!(!bridge.is_initialized());

    ledger.capture_start_fails.store(false, Ordering::SeqCst);
    bridge.initialize(None, 0).unwrap();
    assert_eq!(ledger.handles_open(), 2);
}

#[test]
fn initialize_reaches_prebuffering() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    bridge.initialize(None, 512).unwrap();

    assert_eq!(bridge.state(), BridgeState::Prebuffering);
    assert_eq!(bridge.capture_kind(), Some(CaptureKind::Isochronous));
    assert_eq!(bridge.capture_device().unwrap().name, "M8 Analog Stereo");
    assert_eq!(bridge.output_device().unwrap().name, "Speakers");
    assert_eq!(
        ledger.events(),
        vec!["capture.open", "sink.open", "sink.start", "capture.start"]
    );
}

#[test]
fn close_then_initialize_starts_a_fresh_session() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    bridge.initialize(None, 0).unwrap();
    bridge.close();

    assert_eq!(bridge.state(), BridgeState::Closed);
    assert_eq!(ledger.handles_open(), 0);
    assert!(!ledger.ring_alive());

    bridge.initialize(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Prebuffering);
    assert_eq!(ledger.handles_open(), 2);
    assert!(ledger.ring_alive());
}

#[test]
fn close_stops_capture_before_sink() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    bridge.initialize(None, 0).unwrap();
    bridge.close();

    let events = ledger.events();
    let capture_stop = events.iter().position(|e| *e == "capture.stop").unwrap();
    let sink_stop = events.iter().position(|e| *e == "sink.stop").unwrap();
    assert!(capture_stop < sink_stop);
}

#[test]
fn close_without_session_is_a_no_op() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    bridge.close();
    assert_eq!(bridge.state(), BridgeState::Uninitialized);
    assert!(ledger.events().is_empty());
}

#[test]
fn toggle_initializes_then_pauses_and_resumes_both_sides() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    let delegate = Arc::new(RecordingDelegate::default());
    bridge.set_delegate(delegate.clone());

    bridge.toggle(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Prebuffering);

    bridge.toggle(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Paused);

    bridge.toggle(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Prebuffering);

    let events = ledger.events();
    assert_eq!(
        &events[4..],
        &["capture.pause", "sink.pause", "sink.resume", "capture.resume"]
    );
    assert_eq!(
        *delegate.states.lock(),
        vec![
            BridgeState::Prebuffering,
            BridgeState::Paused,
            BridgeState::Prebuffering
        ]
    );
}

#[test]
fn toggle_after_close_reinitializes() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    bridge.initialize(None, 0).unwrap();
    bridge.close();

    bridge.toggle(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Prebuffering);
    assert_eq!(ledger.handles_open(), 2);
}

#[test]
fn pump_drains_polled_capture_and_playback_starts() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    bridge.initialize(None, 0).unwrap();

    ledger.queue(&[7u8; 2048]);
    assert_eq!(bridge.pump().unwrap(), 2048);
    assert_eq!(bridge.pump().unwrap(), 0);

    let renderer = ledger.renderer();
    let mut out = [0u8; 512];
    renderer.fill(&mut out);
    assert!(out.iter().all(|&b| b == 7));
    assert_eq!(bridge.state(), BridgeState::Playing);
    assert_eq!(bridge.diagnostics().bytes_rendered, 512);
}

#[test]
fn pump_does_nothing_while_paused() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    bridge.initialize(None, 0).unwrap();
    bridge.toggle(None, 0).unwrap();

    ledger.queue(&[1u8; 100]);
    assert_eq!(bridge.pump().unwrap(), 0);
    assert_eq!(ledger.queued.lock().len(), 100);
}

#[test]
fn pump_is_inert_for_isochronous_capture() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    bridge.initialize(None, 0).unwrap();

    ledger.queue(&[1u8; 100]);
    assert_eq!(bridge.pump().unwrap(), 0);
    assert_eq!(ledger.queued.lock().len(), 100);
}

#[test]
fn stream_capture_renders_without_the_ring() {
    let (mut bridge, ledger) = controller(CaptureKind::Stream);
    bridge.initialize(None, 0).unwrap();

    ledger.queue(&[3u8; 2000]);
    let renderer = ledger.renderer();
    let mut fed = Vec::new();
    renderer
        .feed(1500, 1500, |chunk| {
            fed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();

    assert_eq!(fed, vec![3u8; 1500]);
    assert_eq!(ledger.queued.lock().len(), 500);
}

#[test]
fn sink_loss_closes_session_and_reports_disconnect() {
    let (mut bridge, ledger) = controller(CaptureKind::Isochronous);
    let delegate = Arc::new(RecordingDelegate::default());
    bridge.set_delegate(delegate.clone());
    bridge.initialize(None, 0).unwrap();

    let renderer = ledger.renderer();
    let result = renderer.feed(256, 256, |_| {
        Err(BridgeError::SinkWriteFailed("stream destroyed".into()))
    });
    assert!(result.is_err());

    let err = bridge.pump().unwrap_err();
    assert_eq!(
        err,
        BridgeError::Disconnected("sink write failed: stream destroyed".into())
    );
    assert_eq!(bridge.state(), BridgeState::Closed);
    assert_eq!(ledger.handles_open(), 0);
    assert_eq!(*delegate.disconnects.lock(), vec![err]);

    // The host may bring audio back once the device returns.
    bridge.initialize(None, 0).unwrap();
    assert_eq!(bridge.state(), BridgeState::Prebuffering);
}

#[test]
fn polled_capture_loss_closes_session_and_reports_disconnect() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    let delegate = Arc::new(RecordingDelegate::default());
    bridge.set_delegate(delegate.clone());
    bridge.initialize(None, 0).unwrap();

    ledger.queue(&[5u8; 256]);
    assert_eq!(bridge.pump().unwrap(), 256);

    ledger.capture_lost.store(true, Ordering::SeqCst);
    let err = bridge.pump().unwrap_err();
    assert_eq!(
        err,
        BridgeError::Disconnected(
            "capture stream read failed: device no longer available".into()
        )
    );
    assert_eq!(bridge.state(), BridgeState::Closed);
    assert_eq!(ledger.handles_open(), 0);
    assert!(!ledger.ring_alive());
    assert_eq!(*delegate.disconnects.lock(), vec![err]);

    // Nothing left to pump once the session is gone.
    assert_eq!(bridge.pump().unwrap(), 0);
}

#[test]
fn invalid_config_opens_nothing() {
    let ledger = Ledger::new();
    let platform = MockPlatform {
        ledger: Arc::clone(&ledger),
        kind: CaptureKind::Polled,
    };
    let config = BridgeConfig {
        channels: 0,
        ..Default::default()
    };
    let mut bridge = AudioBridgeController::new(platform, config);

    let err = bridge.initialize(None, 0).unwrap_err();
    assert!(matches!(err, BridgeError::ConfigurationFailed(_)));
    assert!(ledger.events().is_empty());
}

#[test]
fn initialize_twice_restarts_session() {
    let (mut bridge, ledger) = controller(CaptureKind::Polled);
    bridge.initialize(None, 0).unwrap();
    bridge.initialize(None, 0).unwrap();

    assert_eq!(ledger.handles_open(), 2);
    assert_eq!(bridge.state(), BridgeState::Prebuffering);
}
