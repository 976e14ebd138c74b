//! MI client error types.

/// Errors from MI client operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MiError {
    /// The target is running; commands are rejected until it stops.
    #[error("target is running")]
    Busy,

    /// The client has been shut down or lost its connection.
    #[error("client is disconnected")]
    Disconnected,

    /// The connection closed while the command was outstanding.
    #[error("connection closed before a result arrived")]
    ConnectionClosed,

    #[error("`{command}` timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    /// `^error` from the debugger.
    #[error("debugger error: {message}")]
    Command {
        message: String,
        code: Option<String>,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("failed to start debugger: {0}")]
    Spawn(String),
}
