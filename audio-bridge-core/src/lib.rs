//! # audio-bridge-core
//!
//! Platform-agnostic core of the M8 audio bridge.
//!
//! Moves 16-bit stereo PCM from the M8's capture path to the host's audio
//! output across two independently scheduled real-time contexts. Provides the
//! shared ring buffer, the prebuffer/underflow policy, isochronous completion
//! handling, render logic for push and pull outputs, and the lifecycle
//! controller. Platform backends implement the `CaptureSource`,
//! `PlaybackSink` and `AudioPlatform` traits and plug into the generic
//! `AudioBridgeController`.
//!
//! ## Architecture
//!
//! ```text
//! audio-bridge-core (this crate)
//! ├── traits/       ← CaptureSource, StreamReader, PlaybackSink, AudioPlatform, BridgeDelegate
//! ├── models/       ← BridgeError, BridgeState, BridgeConfig, DeviceDescriptor, BridgeStats
//! ├── processing/   ← RingBuffer, PrebufferGate, CompletionHandler, SlotTracker, Renderer
//! └── session/      ← AudioSession, AudioBridgeController
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [USB completions | polled queue] → RingBuffer → Renderer (gate) → output callback
//! [stream capture] ─────────────────────────────→ Renderer (gate) → output callback
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    find_capture_device, find_playback_device, BridgeDiagnostics, BridgeStats, DeviceDescriptor,
    DeviceDirection,
};
pub use models::config::{
    BridgeConfig, CaptureBackend, DeliveryModel, UsbEndpointConfig, CAPTURE_DEVICE_PATTERN,
    DEFAULT_BUFFER_FRAMES, TRANSFER_CHUNK_BYTES,
};
pub use models::error::BridgeError;
pub use models::state::BridgeState;
pub use processing::iso_packets::{
    CompletionHandler, ErrorThrottle, IsoPacket, SlotState, SlotTracker, TransferStatus,
};
pub use processing::prebuffer::{GateDecision, PrebufferGate};
pub use processing::render::{feed_goal, RenderInput, Renderer};
pub use processing::ring_buffer::RingBuffer;
pub use session::audio_session::AudioSession;
pub use session::controller::AudioBridgeController;
pub use traits::audio_platform::AudioPlatform;
pub use traits::bridge_delegate::BridgeDelegate;
pub use traits::capture_source::{CaptureKind, CaptureSource, StreamReader};
pub use traits::playback_sink::PlaybackSink;
