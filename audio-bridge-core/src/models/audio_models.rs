use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Capture,
    Playback,
}

/// An audio device found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque platform identifier.
    pub id: String,
    pub name: String,
    pub direction: DeviceDirection,
}

impl DeviceDescriptor {
    pub fn capture(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: DeviceDirection::Capture,
        }
    }

    pub fn playback(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction: DeviceDirection::Playback,
        }
    }
}

/// Finds the capture device whose name contains `pattern` (case-sensitive).
///
/// When several devices match, the last one enumerated wins.
pub fn find_capture_device<'a>(
    devices: &'a [DeviceDescriptor],
    pattern: &str,
) -> Option<&'a DeviceDescriptor> {
    devices
        .iter()
        .filter(|d| d.direction == DeviceDirection::Capture)
        .filter(|d| d.name.contains(pattern))
        .last()
}

/// Finds the first playback device whose name contains `preferred`,
/// ignoring case. `None` means "use the platform default".
pub fn find_playback_device<'a>(
    devices: &'a [DeviceDescriptor],
    preferred: &str,
) -> Option<&'a DeviceDescriptor> {
    let needle = preferred.to_lowercase();
    devices
        .iter()
        .filter(|d| d.direction == DeviceDirection::Playback)
        .find(|d| d.name.to_lowercase().contains(&needle))
}

/// Live counters shared between the capture, render and control contexts.
///
/// All updates are relaxed atomic increments so the real-time paths never
/// wait on them.
#[derive(Debug, Default)]
pub struct BridgeStats {
    bytes_captured: AtomicU64,
    bytes_rendered: AtomicU64,
    bytes_dropped: AtomicU64,
    overflow_events: AtomicU64,
    underflow_events: AtomicU64,
    silence_fills: AtomicU64,
    transfer_errors: AtomicU64,
    error_logs: AtomicU64,
    retired_slots: AtomicU64,
}

impl BridgeStats {
    pub fn record_captured(&self, bytes: usize) {
        self.bytes_captured.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rendered(&self, bytes: usize) {
        self.bytes_rendered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_overflow(&self, dropped: usize) {
        self.overflow_events.fetch_add(1, Ordering::Relaxed);
        self.bytes_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_underflow(&self) {
        self.underflow_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_silence(&self) {
        self.silence_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transfer_error(&self) {
        self.transfer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_log(&self) {
        self.error_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retired_slot(&self) {
        self.retired_slots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeDiagnostics {
        BridgeDiagnostics {
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            bytes_rendered: self.bytes_rendered.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            overflow_events: self.overflow_events.load(Ordering::Relaxed),
            underflow_events: self.underflow_events.load(Ordering::Relaxed),
            silence_fills: self.silence_fills.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
            error_logs: self.error_logs.load(Ordering::Relaxed),
            retired_slots: self.retired_slots.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`] for debugging a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDiagnostics {
    pub bytes_captured: u64,
    pub bytes_rendered: u64,
    pub bytes_dropped: u64,
    pub overflow_events: u64,
    pub underflow_events: u64,
    pub silence_fills: u64,
    pub transfer_errors: u64,
    pub error_logs: u64,
    pub retired_slots: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::capture("0", "Built-in Microphone"),
            DeviceDescriptor::capture("1", "M8 Analog Stereo"),
            DeviceDescriptor::playback("2", "M8 Analog Stereo"),
            DeviceDescriptor::playback("3", "Scarlett 2i2 USB"),
            DeviceDescriptor::capture("4", "m8 lowercase"),
        ]
    }

    #[test]
    fn capture_match_is_case_sensitive() {
        let list = devices();
        let found = find_capture_device(&list, "M8").unwrap();
        assert_eq!(found.id, "1");
        assert!(find_capture_device(&list, "SCARLETT").is_none());
    }

    #[test]
    fn playback_match_ignores_case_and_direction_filters() {
        let list = devices();
        let found = find_playback_device(&list, "scarlett").unwrap();
        assert_eq!(found.id, "3");
        assert!(find_playback_device(&list, "microphone").is_none());
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = BridgeStats::default();
        stats.record_captured(360);
        stats.record_overflow(180);
        stats.record_overflow(180);
        stats.record_retired_slot();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_captured, 360);
        assert_eq!(snap.overflow_events, 2);
        assert_eq!(snap.bytes_dropped, 360);
        assert_eq!(snap.retired_slots, 1);
        assert_eq!(snap.underflow_events, 0);
    }
}
