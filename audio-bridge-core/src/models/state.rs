/// Audio session state machine.
///
/// State transitions:
/// ```text
/// uninitialized → prebuffering ⇄ playing
///                      ↓    ↕       ↓
///                      └→ paused ←──┘
///            any active state → closed → (initialize) → prebuffering
/// ```
///
/// `Prebuffering` and `Playing` are the two halves of the active state; the
/// render context moves between them through the prebuffer gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Prebuffering,
    Playing,
    Paused,
    Closed,
}

impl BridgeState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Prebuffering | Self::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Whether a session is currently allocated.
    pub fn has_session(&self) -> bool {
        self.is_active() || self.is_paused()
    }

    /// Whether `toggle` should start a fresh session from this state.
    pub fn needs_initialize(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Closed)
    }
}
