use std::sync::Arc;

use crate::models::audio_models::{BridgeDiagnostics, BridgeStats, DeviceDescriptor};
use crate::models::config::BridgeConfig;
use crate::models::error::BridgeError;
use crate::models::state::BridgeState;
use crate::session::audio_session::AudioSession;
use crate::traits::audio_platform::AudioPlatform;
use crate::traits::bridge_delegate::BridgeDelegate;
use crate::traits::capture_source::CaptureKind;

/// Lifecycle controller for the M8 audio bridge.
///
/// Generic over the platform that opens devices via the `AudioPlatform`
/// trait. Owned by the host application and driven from its control loop:
///
/// ```text
/// host loop ── initialize / toggle ──→ AudioSession (capture + ring + sink)
///           ── pump (every frame) ───→ drain polled capture, detect device loss
///           ── close ────────────────→ teardown
/// ```
///
/// The controller spawns no threads. Capture and render run in the USB
/// library's and the audio engine's own contexts.
pub struct AudioBridgeController<P: AudioPlatform> {
    platform: P,
    config: BridgeConfig,
    session: Option<AudioSession>,
    state: BridgeState,
    delegate: Option<Arc<dyn BridgeDelegate>>,
    stats: Arc<BridgeStats>,
}

impl<P: AudioPlatform> AudioBridgeController<P> {
    pub fn new(platform: P, config: BridgeConfig) -> Self {
        Self {
            platform,
            config,
            session: None,
            state: BridgeState::Uninitialized,
            delegate: None,
            stats: Arc::new(BridgeStats::default()),
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn BridgeDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Current state. An active session reports `Playing` once its
    /// prebuffer has filled.
    pub fn state(&self) -> BridgeState {
        match (&self.state, &self.session) {
            (BridgeState::Prebuffering, Some(session)) if session.is_playing() => {
                BridgeState::Playing
            }
            (state, _) => *state,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Counters of the current session, or of the last one after `close`.
    pub fn diagnostics(&self) -> BridgeDiagnostics {
        self.stats.snapshot()
    }

    pub fn capture_kind(&self) -> Option<CaptureKind> {
        self.session.as_ref().map(AudioSession::capture_kind)
    }

    pub fn capture_device(&self) -> Option<&DeviceDescriptor> {
        self.session.as_ref().map(AudioSession::capture_device)
    }

    pub fn output_device(&self) -> Option<&DeviceDescriptor> {
        self.session.as_ref().map(AudioSession::output_device)
    }

    /// Open the M8 capture device and the output device and start bridging.
    ///
    /// `output_device_name` overrides the configured preferred output;
    /// `buffer_size_frames` of `0` selects the default. On failure nothing
    /// stays open and the call can simply be retried later. Calling this
    /// with a session already running restarts it.
    pub fn initialize(
        &mut self,
        output_device_name: Option<&str>,
        buffer_size_frames: u32,
    ) -> Result<(), BridgeError> {
        if self.session.is_some() {
            log::warn!("audio already initialized, restarting session");
            self.close();
        }

        let config = self.config.for_session(output_device_name, buffer_size_frames);
        config.validate().map_err(BridgeError::ConfigurationFailed)?;

        log::info!(
            "audio setup: output {}, buffer {} frames",
            config.output_device_name.as_deref().unwrap_or("(default)"),
            config.effective_buffer_frames()
        );

        match AudioSession::open(&mut self.platform, &config) {
            Ok(session) => {
                log::info!(
                    "audio initialized: {} → {}",
                    session.capture_device().name,
                    session.output_device().name
                );
                self.stats = Arc::clone(session.stats());
                self.session = Some(session);
                self.set_state(BridgeState::Prebuffering);
                Ok(())
            }
            Err(e) => {
                log::error!("cannot initialize audio: {}", e);
                Err(e)
            }
        }
    }

    /// Start audio if it is not running, otherwise pause or resume it.
    pub fn toggle(
        &mut self,
        output_device_name: Option<&str>,
        buffer_size_frames: u32,
    ) -> Result<(), BridgeError> {
        if self.state.needs_initialize() || self.session.is_none() {
            return self.initialize(output_device_name, buffer_size_frames);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if session.is_paused() {
            session.resume()?;
            log::info!("audio resumed");
            self.set_state(BridgeState::Prebuffering);
        } else {
            session.pause()?;
            log::info!("audio paused");
            self.set_state(BridgeState::Paused);
        }
        Ok(())
    }

    /// Per-frame work from the host loop.
    ///
    /// Drains a polled capture source into the ring buffer and returns the
    /// number of bytes moved; other sources need no pumping and return 0.
    /// If the output or the polled capture device was lost since the last
    /// call the session is closed and `Disconnected` is returned.
    pub fn pump(&mut self) -> Result<usize, BridgeError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };

        if let Some(cause) = session.lost() {
            return Err(self.handle_device_loss(cause));
        }

        match session.drain() {
            Ok(moved) => Ok(moved),
            Err(cause) => Err(self.handle_device_loss(cause)),
        }
    }

    /// Stop capture and playback and free the session.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            log::debug!("audio not initialized, nothing to close");
            return;
        };

        log::debug!("closing audio");
        session.close();
        self.set_state(BridgeState::Closed);
        log::info!("audio closed");
    }

    fn handle_device_loss(&mut self, cause: BridgeError) -> BridgeError {
        let error = match cause {
            BridgeError::Disconnected(_) => cause,
            other => BridgeError::Disconnected(other.to_string()),
        };
        log::error!("{}, closing audio", error);
        self.close();
        if let Some(ref delegate) = self.delegate {
            delegate.on_disconnected(&error);
        }
        error
    }

    fn set_state(&mut self, new_state: BridgeState) {
        if self.state == new_state {
            return;
        }
        self.state = new_state;
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(new_state);
        }
    }
}
