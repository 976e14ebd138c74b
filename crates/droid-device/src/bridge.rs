//! Capabilities used to reach a device.
//!
//! Everything above this module talks to the device only through these
//! traits. Calls are blocking and bounded by an explicit timeout; async
//! callers should wrap them in `spawn_blocking`.

use std::fmt;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ShellError;

/// Captured result of a synchronous remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
}

impl ShellOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives each line of a streaming command's output.
pub type LineListener = Box<dyn FnMut(&str) + Send>;

/// Handle to a long-running remote command started with
/// [`RemoteShell::execute_async`].
///
/// Dropping the handle terminates the command.
pub struct ShellStream {
    terminate: Option<Box<dyn FnOnce() + Send>>,
    reader: Option<JoinHandle<()>>,
}

impl ShellStream {
    pub fn new(terminate: Box<dyn FnOnce() + Send>, reader: JoinHandle<()>) -> Self {
        Self {
            terminate: Some(terminate),
            reader: Some(reader),
        }
    }

    /// Whether the output reader has seen end-of-stream.
    pub fn is_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, |r| r.is_finished())
    }

    /// Stop the command and wait for the output reader to drain.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    /// Wait for the command to end on its own.
    pub fn wait(mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.terminate = None;
    }

    fn shutdown(&mut self) {
        if let Some(terminate) = self.terminate.take() {
            terminate();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for ShellStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ShellStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellStream")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Runs commands in the device's shell.
pub trait RemoteShell: Send + Sync {
    /// Run `command args` to completion, failing once `timeout` elapses.
    fn execute(&self, command: &str, args: &str, timeout: Duration)
        -> Result<ShellOutput, ShellError>;

    /// Start `command args` and feed its output, line by line, to `listener`
    /// until it exits or the returned handle is terminated.
    fn execute_async(
        &self,
        command: &str,
        args: &str,
        listener: LineListener,
    ) -> Result<ShellStream, ShellError>;
}

/// Moves files between host and device.
pub trait FileTransfer: Send + Sync {
    fn push_file(&self, local: &Path, remote: &str, timeout: Duration) -> Result<(), ShellError>;

    /// Copy `remote` to `local`. A remote path ending in `/` is mirrored
    /// recursively into `local`. Returns `Ok(false)` when the remote side
    /// does not have the path.
    fn pull_file(&self, remote: &str, local: &Path, timeout: Duration)
        -> Result<bool, ShellError>;
}

/// Device end of a forwarded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardTarget {
    /// A TCP port on the device.
    Tcp(u16),
    /// The JDWP endpoint of the VM running in process `pid`.
    Jdwp(u32),
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardTarget::Tcp(port) => write!(f, "tcp:{port}"),
            ForwardTarget::Jdwp(pid) => write!(f, "jdwp:{pid}"),
        }
    }
}

/// Exposes device endpoints on local ports.
pub trait PortForward: Send + Sync {
    fn forward(&self, local_port: u16, remote: ForwardTarget) -> Result<(), ShellError>;

    /// Remove every forward registered for the device, including ones
    /// created by other sessions.
    fn clear_all_forwards(&self) -> Result<(), ShellError>;
}

/// Everything a [`crate::Device`] needs from its transport.
pub trait DeviceBridge: RemoteShell + FileTransfer + PortForward {}

impl<T: RemoteShell + FileTransfer + PortForward> DeviceBridge for T {}
