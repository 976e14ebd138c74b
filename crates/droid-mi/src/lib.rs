//! GDB/MI client: record parser, command correlation and a per-thread
//! stack-frame cache.

pub mod client;
pub mod dispatcher;
pub mod error;
#[cfg(test)]
mod fake;
pub mod protocol;
pub mod session;
pub mod stack;
pub mod transport;

pub use client::{ClientOptions, FaultPolicy, ProtocolClient, ResumeHook};
pub use dispatcher::Correlation;
pub use error::MiError;
pub use protocol::{
    parse_line, AsyncKind, AsyncRecord, Line, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Value,
};
pub use session::ClientState;
pub use stack::{StackFrame, ThreadStackCache};
