//! Client connection state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Running <-> Stopped
//!                                    any state -> Disconnected
//! ```
//!
//! `Ready` is left on the first `*running` or `*stopped` and never
//! re-entered: once the target has reported a state, idle is `Stopped`.
//! A client that reaches `Disconnected` after connecting stays there; a new
//! client must be created to talk to the debugger again.

use crate::error::MiError;
use crate::protocol::{AsyncRecord, ResultClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Connection open, init script not yet run.
    Connecting,
    /// Init script done, target state not reported yet. Only reached
    /// before the first stop; an idle target after that is `Stopped`.
    Ready,
    /// The target is executing.
    Running,
    /// The target is halted.
    Stopped,
}

impl ClientState {
    /// Whether a command may be written now.
    pub fn admit_command(self) -> Result<(), MiError> {
        match self {
            ClientState::Connecting | ClientState::Ready | ClientState::Stopped => Ok(()),
            ClientState::Running => Err(MiError::Busy),
            ClientState::Disconnected => Err(MiError::Disconnected),
        }
    }

    /// State after an exec async record, if it changes anything.
    pub fn after_async(self, record: &AsyncRecord) -> Option<ClientState> {
        if self == ClientState::Disconnected {
            return None;
        }
        if record.is_running() {
            Some(ClientState::Running)
        } else if record.is_stopped() {
            Some(ClientState::Stopped)
        } else {
            None
        }
    }

    /// State after a result record. Only `^running` moves the machine;
    /// other results leave the current state in place.
    pub fn after_result(self, class: ResultClass) -> Option<ClientState> {
        match (self, class) {
            (ClientState::Disconnected, _) => None,
            (_, ResultClass::Running) => Some(ClientState::Running),
            _ => None,
        }
    }
}
