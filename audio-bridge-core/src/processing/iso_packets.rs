//! Isochronous completion handling, independent of the USB library.
//!
//! The backend translates each completed transfer into [`IsoPacket`]s and
//! hands them to a [`CompletionHandler`]; the [`SlotTracker`] records which
//! transfer slots are in flight so shutdown can wait for every one of them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::audio_models::BridgeStats;
use crate::models::config::ERROR_LOG_INTERVAL;
use crate::models::error::BridgeError;
use crate::processing::ring_buffer::RingBuffer;

/// Status of a transfer or of one isochronous packet, in libusb numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
    Unknown(i32),
}

impl TransferStatus {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Completed,
            1 => Self::Error,
            2 => Self::TimedOut,
            3 => Self::Cancelled,
            4 => Self::Stall,
            5 => Self::NoDevice,
            6 => Self::Overflow,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Error => 1,
            Self::TimedOut => 2,
            Self::Cancelled => 3,
            Self::Stall => 4,
            Self::NoDevice => 5,
            Self::Overflow => 6,
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "LIBUSB_TRANSFER_COMPLETED",
            Self::Error => "LIBUSB_TRANSFER_ERROR",
            Self::TimedOut => "LIBUSB_TRANSFER_TIMED_OUT",
            Self::Cancelled => "LIBUSB_TRANSFER_CANCELLED",
            Self::Stall => "LIBUSB_TRANSFER_STALL",
            Self::NoDevice => "LIBUSB_TRANSFER_NO_DEVICE",
            Self::Overflow => "LIBUSB_TRANSFER_OVERFLOW",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "status {}: {}", self.code(), name)
    }
}

/// One packet of a completed isochronous transfer.
#[derive(Debug, Clone, Copy)]
pub struct IsoPacket<'a> {
    pub status: TransferStatus,
    /// Bytes actually received (`actual_length` of the packet).
    pub payload: &'a [u8],
}

/// Decides which packet errors get logged.
///
/// Logs the first error of every `interval` consecutive errors. Any
/// successful packet ends the run.
#[derive(Debug)]
pub struct ErrorThrottle {
    interval: u64,
    consecutive: u64,
}

impl ErrorThrottle {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            consecutive: 0,
        }
    }

    /// Records an error; returns `true` if this one should be logged.
    pub fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        (self.consecutive - 1) % self.interval == 0
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(ERROR_LOG_INTERVAL)
    }
}

/// What one call to [`CompletionHandler::process`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    pub pushed_bytes: usize,
    pub dropped_packets: usize,
    pub errors: usize,
    pub logged_errors: usize,
}

/// Pushes the payload of completed packets into the shared ring buffer.
///
/// Runs in the USB library's event context. Nothing here blocks or stops the
/// stream: overflowing packets are dropped, failing packets are counted.
#[derive(Debug)]
pub struct CompletionHandler {
    buffer: Arc<RingBuffer>,
    stats: Arc<BridgeStats>,
    throttle: ErrorThrottle,
}

impl CompletionHandler {
    pub fn new(buffer: Arc<RingBuffer>, stats: Arc<BridgeStats>) -> Self {
        Self {
            buffer,
            stats,
            throttle: ErrorThrottle::default(),
        }
    }

    pub fn process<'a, I>(&mut self, packets: I) -> CompletionSummary
    where
        I: IntoIterator<Item = IsoPacket<'a>>,
    {
        let mut summary = CompletionSummary::default();

        for packet in packets {
            if !packet.status.is_completed() {
                summary.errors += 1;
                self.stats.record_transfer_error();
                if self.throttle.record_error() {
                    summary.logged_errors += 1;
                    self.stats.record_error_log();
                    log::error!(
                        "{} ({} consecutive)",
                        BridgeError::TransferCompletionError {
                            status: packet.status
                        },
                        self.throttle.consecutive()
                    );
                }
                continue;
            }

            self.throttle.record_success();
            if packet.payload.is_empty() {
                continue;
            }

            match self.buffer.push(packet.payload) {
                Ok(n) => {
                    summary.pushed_bytes += n;
                    self.stats.record_captured(n);
                }
                Err(e) => {
                    summary.dropped_packets += 1;
                    self.stats.record_overflow(packet.payload.len());
                    log::debug!("{}", e);
                }
            }
        }

        summary
    }
}

/// Lifecycle of one transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Allocated, not submitted.
    Idle = 0,
    /// Owned by the USB library until its completion callback runs.
    InFlight = 1,
    /// Resubmission failed; never submitted again this session.
    Retired = 2,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::InFlight,
            2 => Self::Retired,
            _ => Self::Idle,
        }
    }
}

/// Tracks the state of every slot in the transfer arena.
///
/// Shared between the event context (completions) and the control context
/// (submission and shutdown) through atomics only, so shutdown can wait for
/// `in_flight() == 0` without taking any lock a completion might hold.
#[derive(Debug)]
pub struct SlotTracker {
    states: Vec<AtomicU8>,
    in_flight: AtomicUsize,
    stopping: AtomicBool,
    stats: Arc<BridgeStats>,
}

impl SlotTracker {
    pub fn new(slot_count: usize, stats: Arc<BridgeStats>) -> Self {
        Self {
            states: (0..slot_count)
                .map(|_| AtomicU8::new(SlotState::Idle as u8))
                .collect(),
            in_flight: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        SlotState::from_u8(self.states[slot].load(Ordering::Acquire))
    }

    /// Submit an idle slot through `submit`.
    ///
    /// The slot is marked in flight before `submit` runs, so a completion
    /// racing the call always finds it in flight. A failed submission retires
    /// the slot and returns `TransferSubmitFailed`.
    pub fn submit<E, F>(&self, slot: usize, submit: F) -> Result<(), BridgeError>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<(), E>,
    {
        if self.state(slot) != SlotState::Idle {
            return Ok(());
        }

        self.states[slot].store(SlotState::InFlight as u8, Ordering::Release);
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        match submit() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.retire(slot);
                Err(BridgeError::TransferSubmitFailed {
                    slot,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Called from the completion callback after the packets were handled.
    ///
    /// While stopping the slot goes idle. A transfer cancelled outside a stop
    /// retires its slot. Otherwise `resubmit` runs; on failure the slot is
    /// retired and capture continues with the remaining slots.
    pub fn complete<E, F>(&self, slot: usize, status: TransferStatus, resubmit: F) -> SlotState
    where
        E: fmt::Display,
        F: FnOnce() -> Result<(), E>,
    {
        if self.is_stopping() {
            self.states[slot].store(SlotState::Idle as u8, Ordering::Release);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return SlotState::Idle;
        }

        if status == TransferStatus::Cancelled {
            log::warn!("transfer slot {} cancelled while capturing, retiring it", slot);
            self.retire(slot);
            return SlotState::Retired;
        }

        match resubmit() {
            Ok(()) => SlotState::InFlight,
            Err(e) => {
                log::error!(
                    "{}",
                    BridgeError::TransferSubmitFailed {
                        slot,
                        reason: e.to_string()
                    }
                );
                self.retire(slot);
                SlotState::Retired
            }
        }
    }

    fn retire(&self, slot: usize) {
        self.states[slot].store(SlotState::Retired as u8, Ordering::Release);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_retired_slot();
    }

    /// Stop resubmitting; completions from now on leave their slot idle.
    pub fn begin_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// Allow submissions again after a stop, reviving retired slots.
    pub fn reset(&self) {
        for state in &self.states {
            state.store(SlotState::Idle as u8, Ordering::Release);
        }
        self.stopping.store(false, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn in_flight_slots(&self) -> Vec<usize> {
        (0..self.states.len())
            .filter(|&slot| self.state(slot) == SlotState::InFlight)
            .collect()
    }

    pub fn retired(&self) -> usize {
        (0..self.states.len())
            .filter(|&slot| self.state(slot) == SlotState::Retired)
            .count()
    }
}
