use std::sync::atomic::{AtomicBool, Ordering};

/// What the render context should emit for one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Silence,
    Real,
}

/// Holds playback back until enough audio is buffered, and re-arms after a
/// full underflow.
///
/// Playing from a nearly empty buffer alternates silence and tiny fragments,
/// which is audible as stutter. Waiting for `threshold` bytes costs a fixed
/// `threshold / byte_rate` of latency instead.
///
/// Only the render context calls [`decide`](Self::decide); the control
/// context reads [`is_filled`](Self::is_filled) to report the session phase.
#[derive(Debug)]
pub struct PrebufferGate {
    threshold: usize,
    filled: AtomicBool,
}

impl PrebufferGate {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            filled: AtomicBool::new(false),
        }
    }

    pub fn decide(&self, available: usize) -> GateDecision {
        if available == 0 {
            if self.filled.swap(false, Ordering::AcqRel) {
                log::debug!("buffer underflow, resetting prebuffer");
            }
            return GateDecision::Silence;
        }

        if !self.filled.load(Ordering::Acquire) {
            if available < self.threshold {
                return GateDecision::Silence;
            }
            self.filled.store(true, Ordering::Release);
            log::debug!("audio prebuffer filled ({} bytes), starting playback", available);
        }

        GateDecision::Real
    }

    pub fn is_filled(&self) -> bool {
        self.filled.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.filled.store(false, Ordering::Release);
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
