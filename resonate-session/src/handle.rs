use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::controller::ControlMsg;
use crate::{SessionState, SessionStats};

/// Handle to a running session. Cheap to clone-by-reference (it only
/// holds shared state and channel senders); the actual connection and its
/// tasks live behind [`crate::SessionController::spawn`].
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    stats: Arc<Mutex<SessionStats>>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        state: Arc<Mutex<SessionState>>,
        stats: Arc<Mutex<SessionStats>>,
        control_tx: mpsc::UnboundedSender<ControlMsg>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            stats,
            control_tx,
            shutdown,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.lock().unwrap()
    }

    /// `volume` is clamped to `[0.0, 1.0]`; scaled to 0-100 on the wire.
    pub fn set_volume(&self, volume: f32) {
        let _ = self
            .control_tx
            .send(ControlMsg::SetVolume(volume.clamp(0.0, 1.0)));
    }

    pub fn set_mute(&self, muted: bool) {
        let _ = self.control_tx.send(ControlMsg::SetMute(muted));
    }

    /// Cancels all session tasks. Idempotent: a second call while the
    /// first is still unwinding is a no-op (the token is already
    /// cancelled), and the controller settles in `Disconnected` either
    /// way.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }
}
