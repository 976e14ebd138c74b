//! In-memory [`DeviceBridge`](crate::DeviceBridge) that replays canned output.
//!
//! Shell responses are keyed by the full command line (`"command args"`,
//! trimmed). Each key holds a queue; the last queued response is sticky so a
//! command refreshed repeatedly keeps answering the same way. Unscripted
//! commands succeed with empty output.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::bridge::{
    FileTransfer, ForwardTarget, LineListener, PortForward, RemoteShell, ShellOutput, ShellStream,
};
use crate::error::ShellError;

/// One recorded interaction with the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    Execute { command: String, args: String },
    Push { local: PathBuf, remote: String },
    Pull { remote: String, local: PathBuf },
    Forward { local_port: u16, target: ForwardTarget },
    ClearForwards,
}

#[derive(Debug, Clone)]
enum Response {
    Output(ShellOutput),
    Timeout,
}

#[derive(Debug, Default)]
struct State {
    responses: HashMap<String, VecDeque<Response>>,
    remote_files: BTreeMap<String, Vec<u8>>,
    broken_paths: HashSet<String>,
    forward_fails: bool,
    calls: Vec<BridgeCall>,
}

/// Scripted bridge for tests and dry runs.
#[derive(Debug, Default)]
pub struct ScriptedBridge {
    state: Mutex<State>,
}

fn key(command: &str, args: &str) -> String {
    format!("{command} {args}").trim().to_string()
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_response(&self, line: &str, response: Response) -> &Self {
        self.lock()
            .responses
            .entry(line.trim().to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Queue a successful response for `line`.
    pub fn on_shell(&self, line: &str, stdout: &str) -> &Self {
        self.push_response(line, Response::Output(ShellOutput::ok(stdout)))
    }

    /// Queue a response with an explicit exit code for `line`.
    pub fn on_shell_exit(&self, line: &str, exit_code: i32, stdout: &str) -> &Self {
        self.push_response(
            line,
            Response::Output(ShellOutput {
                exit_code,
                stdout: stdout.to_string(),
            }),
        )
    }

    /// Make `line` time out.
    pub fn fail_shell(&self, line: &str) -> &Self {
        self.push_response(line, Response::Timeout)
    }

    /// Place a file on the fake device.
    pub fn with_remote_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> &Self {
        self.lock()
            .remote_files
            .insert(path.to_string(), contents.into());
        self
    }

    /// Make every transfer of `path` fail at the transport level.
    pub fn break_transfer(&self, path: &str) -> &Self {
        self.lock().broken_paths.insert(path.to_string());
        self
    }

    /// Make `forward` calls fail.
    pub fn fail_forwards(&self) -> &Self {
        self.lock().forward_fails = true;
        self
    }

    /// Remote file contents, including anything pushed.
    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().remote_files.get(path).cloned()
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.lock().calls.clone()
    }

    pub fn pull_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BridgeCall::Pull { .. }))
            .count()
    }

    pub fn forwards(&self) -> Vec<(u16, ForwardTarget)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BridgeCall::Forward { local_port, target } => Some((*local_port, *target)),
                _ => None,
            })
            .collect()
    }

    fn next_response(&self, command: &str, args: &str) -> Option<Response> {
        let mut state = self.lock();
        state.calls.push(BridgeCall::Execute {
            command: command.to_string(),
            args: args.to_string(),
        });
        let queue = state.responses.get_mut(&key(command, args))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn write_local(path: &Path, contents: &[u8]) -> Result<(), ShellError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

impl RemoteShell for ScriptedBridge {
    fn execute(
        &self,
        command: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<ShellOutput, ShellError> {
        match self.next_response(command, args) {
            Some(Response::Output(out)) => Ok(out),
            Some(Response::Timeout) => Err(ShellError::Timeout {
                command: key(command, args),
                timeout_ms: timeout.as_millis(),
            }),
            None => Ok(ShellOutput::default()),
        }
    }

    fn execute_async(
        &self,
        command: &str,
        args: &str,
        mut listener: LineListener,
    ) -> Result<ShellStream, ShellError> {
        let stdout = match self.next_response(command, args) {
            Some(Response::Output(out)) => out.stdout,
            Some(Response::Timeout) => {
                return Err(ShellError::Timeout {
                    command: key(command, args),
                    timeout_ms: 0,
                })
            }
            None => String::new(),
        };
        let reader = thread::spawn(move || {
            for line in stdout.lines() {
                listener(line);
            }
        });
        Ok(ShellStream::new(Box::new(|| {}), reader))
    }
}

impl FileTransfer for ScriptedBridge {
    fn push_file(&self, local: &Path, remote: &str, _timeout: Duration) -> Result<(), ShellError> {
        let contents = std::fs::read(local)?;
        let mut state = self.lock();
        state.calls.push(BridgeCall::Push {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        if state.broken_paths.contains(remote) {
            return Err(ShellError::Failed {
                command: "push".into(),
                code: 1,
                message: format!("transfer of {remote} failed"),
            });
        }
        state.remote_files.insert(remote.to_string(), contents);
        Ok(())
    }

    fn pull_file(&self, remote: &str, local: &Path, _timeout: Duration) -> Result<bool, ShellError> {
        let (files, broken) = {
            let mut state = self.lock();
            state.calls.push(BridgeCall::Pull {
                remote: remote.to_string(),
                local: local.to_path_buf(),
            });
            let files: Vec<(String, Vec<u8>)> = if remote.ends_with('/') {
                state
                    .remote_files
                    .range(remote.to_string()..)
                    .take_while(|(path, _)| path.starts_with(remote))
                    .map(|(path, data)| (path[remote.len()..].to_string(), data.clone()))
                    .collect()
            } else {
                state
                    .remote_files
                    .get(remote)
                    .map(|data| vec![(String::new(), data.clone())])
                    .unwrap_or_default()
            };
            (files, state.broken_paths.contains(remote))
        };

        if broken {
            return Err(ShellError::Failed {
                command: "pull".into(),
                code: 1,
                message: format!("transfer of {remote} failed"),
            });
        }
        if files.is_empty() {
            return Ok(false);
        }
        for (relative, data) in files {
            let target = if relative.is_empty() {
                local.to_path_buf()
            } else {
                local.join(relative)
            };
            write_local(&target, &data)?;
        }
        Ok(true)
    }
}

impl PortForward for ScriptedBridge {
    fn forward(&self, local_port: u16, remote: ForwardTarget) -> Result<(), ShellError> {
        let mut state = self.lock();
        state.calls.push(BridgeCall::Forward {
            local_port,
            target: remote,
        });
        if state.forward_fails {
            return Err(ShellError::Failed {
                command: "forward".into(),
                code: 1,
                message: format!("cannot bind to tcp:{local_port}"),
            });
        }
        Ok(())
    }

    fn clear_all_forwards(&self) -> Result<(), ShellError> {
        self.lock().calls.push(BridgeCall::ClearForwards);
        Ok(())
    }
}
