use thiserror::Error;

use crate::processing::iso_packets::TransferStatus;

/// Errors raised by the audio bridge.
///
/// Only session establishment failures (`DeviceNotFound`, `DeviceOpenFailed`)
/// and in-session sink loss (`SinkWriteFailed`, `StreamReadFailed`,
/// `Disconnected`) are returned to the host. The transient variants are built
/// by the real-time paths for logging and accounting and never propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no capture device matching \"{pattern}\"")]
    DeviceNotFound { pattern: String },

    #[error("failed to open {device}: {reason}")]
    DeviceOpenFailed { device: String, reason: String },

    #[error("transfer slot {slot} could not be submitted: {reason}")]
    TransferSubmitFailed { slot: usize, reason: String },

    #[error("isochronous packet failed: {status}")]
    TransferCompletionError { status: TransferStatus },

    #[error("ring buffer overflow: {requested} bytes offered, {free} free")]
    BufferOverflow { requested: usize, free: usize },

    #[error("ring buffer underflow: {requested} bytes wanted, {available} available")]
    BufferUnderflow { requested: usize, available: usize },

    #[error("sink write failed: {0}")]
    SinkWriteFailed(String),

    #[error("capture stream read failed: {0}")]
    StreamReadFailed(String),

    #[error("audio device disconnected: {0}")]
    Disconnected(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

impl BridgeError {
    pub fn open_failed(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceOpenFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends an active session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::SinkWriteFailed(_) | Self::StreamReadFailed(_) | Self::Disconnected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_names_sizes() {
        let err = BridgeError::BufferOverflow {
            requested: 360,
            free: 12,
        };
        assert_eq!(
            err.to_string(),
            "ring buffer overflow: 360 bytes offered, 12 free"
        );
    }

    #[test]
    fn sink_loss_is_fatal_but_overflow_is_not() {
        assert!(BridgeError::SinkWriteFailed("gone".into()).is_session_fatal());
        assert!(BridgeError::StreamReadFailed("gone".into()).is_session_fatal());
        assert!(!BridgeError::BufferOverflow { requested: 1, free: 0 }.is_session_fatal());
        assert!(!BridgeError::DeviceNotFound { pattern: "M8".into() }.is_session_fatal());
    }

    #[test]
    fn open_failed_keeps_reason_text() {
        let err = BridgeError::open_failed("M8 Analog", "busy");
        assert_eq!(err.to_string(), "failed to open M8 Analog: busy");
    }
}
