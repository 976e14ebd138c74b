//! Debug session preparation: port tunnels, the local artifact cache and
//! the debugger init script.

pub mod artifact;
pub mod error;
pub mod jdwp;
pub mod setup;

pub use artifact::{native_libraries, Artifact, ArtifactCache};
pub use error::{ArtifactError, SessionError, SetupStage};
pub use jdwp::{JdwpSetup, DEFAULT_JDWP_PORT};
pub use setup::{SessionConfig, SessionOptions, SessionSetup, DEFAULT_GDB_PORT};
