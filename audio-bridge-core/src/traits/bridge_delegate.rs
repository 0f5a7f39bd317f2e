use crate::models::error::BridgeError;
use crate::models::state::BridgeState;

/// Event delegate for audio bridge notifications.
///
/// Methods are called from the host's control context, inside
/// `initialize`/`toggle`/`pump`/`close`. The prebuffering → playing
/// transition happens in the render context and is not reported here; read
/// it with `AudioBridgeController::state`.
pub trait BridgeDelegate: Send + Sync {
    /// Called when the controller changes state.
    fn on_state_changed(&self, state: BridgeState);

    /// Called when an active session was closed because a device went away.
    fn on_disconnected(&self, error: &BridgeError);
}
