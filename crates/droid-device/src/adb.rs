//! [`DeviceBridge`](crate::DeviceBridge) backed by the `adb` executable.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::bridge::{
    FileTransfer, ForwardTarget, LineListener, PortForward, RemoteShell, ShellOutput, ShellStream,
};
use crate::error::ShellError;

/// Deadline for `adb forward` invocations.
const FORWARD_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Interval between exit checks while waiting on a child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Talks to one device through `adb -s <serial>`.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb: PathBuf,
    serial: Option<String>,
}

/// stdout/stderr of a finished `adb` run.
struct Captured {
    code: i32,
    stdout: String,
    stderr: String,
}

impl AdbBridge {
    /// `serial` of `None` targets the only attached device.
    pub fn new(adb: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            adb: adb.into(),
            serial,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Serials of every device in the `device` state.
    pub fn list_devices(adb: &Path, timeout: Duration) -> Result<Vec<String>, ShellError> {
        let bridge = Self::new(adb, None);
        let out = bridge.run(["devices"].map(OsString::from), timeout)?;
        if out.code != 0 {
            return Err(ShellError::Failed {
                command: "devices".into(),
                code: out.code,
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(parse_device_list(&out.stdout))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    fn describe<I: IntoIterator<Item = OsString>>(args: I) -> String {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run<I>(&self, args: I, timeout: Duration) -> Result<Captured, ShellError>
    where
        I: IntoIterator<Item = OsString> + Clone,
    {
        let label = Self::describe(args.clone());
        tracing::debug!(command = %label, "adb");

        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ShellError::Spawn {
                program: self.adb.display().to_string(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ShellError::Timeout {
                    command: label,
                    timeout_ms: timeout.as_millis(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(Captured {
            code: status.code().unwrap_or(-1),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

/// Read a child pipe to completion on a helper thread so a full pipe never
/// stalls the child while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn remote_missing(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("No such file")
}

impl RemoteShell for AdbBridge {
    fn execute(
        &self,
        command: &str,
        args: &str,
        timeout: Duration,
    ) -> Result<ShellOutput, ShellError> {
        let line = format!("{command} {args}").trim_end().to_string();
        let out = self.run(["shell".into(), OsString::from(line)], timeout)?;
        Ok(ShellOutput {
            exit_code: out.code,
            stdout: out.stdout,
        })
    }

    fn execute_async(
        &self,
        command: &str,
        args: &str,
        mut listener: LineListener,
    ) -> Result<ShellStream, ShellError> {
        let line = format!("{command} {args}").trim_end().to_string();
        let mut child = self
            .command()
            .arg("shell")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ShellError::Spawn {
                program: self.adb.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let child: Arc<Mutex<Child>> = Arc::new(Mutex::new(child));

        let reader = thread::spawn(move || {
            let Some(stdout) = stdout else { return };
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => listener(line.trim_end_matches('\r')),
                    Err(_) => break,
                }
            }
        });

        let handle = child.clone();
        let terminate = Box::new(move || {
            let mut child = handle.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = child.kill();
            let _ = child.wait();
        });
        tracing::debug!(command = %line, "started streaming shell command");
        Ok(ShellStream::new(terminate, reader))
    }
}

impl FileTransfer for AdbBridge {
    fn push_file(&self, local: &Path, remote: &str, timeout: Duration) -> Result<(), ShellError> {
        let args = [
            OsString::from("push"),
            local.as_os_str().to_owned(),
            OsString::from(remote),
        ];
        let out = self.run(args, timeout)?;
        if out.code != 0 {
            return Err(ShellError::Failed {
                command: "push".into(),
                code: out.code,
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn pull_file(&self, remote: &str, local: &Path, timeout: Duration) -> Result<bool, ShellError> {
        let args = [
            OsString::from("pull"),
            OsString::from(remote),
            local.as_os_str().to_owned(),
        ];
        let out = self.run(args, timeout)?;
        match out.code {
            0 => Ok(true),
            _ if remote_missing(&out.stderr) || remote_missing(&out.stdout) => {
                tracing::debug!(remote, "remote path not found");
                Ok(false)
            }
            code => Err(ShellError::Failed {
                command: "pull".into(),
                code,
                message: out.stderr.trim().to_string(),
            }),
        }
    }
}

impl PortForward for AdbBridge {
    fn forward(&self, local_port: u16, remote: ForwardTarget) -> Result<(), ShellError> {
        let args = [
            OsString::from("forward"),
            OsString::from(format!("tcp:{local_port}")),
            OsString::from(remote.to_string()),
        ];
        let out = self.run(args, FORWARD_TIMEOUT)?;
        if out.code != 0 {
            return Err(ShellError::Failed {
                command: "forward".into(),
                code: out.code,
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn clear_all_forwards(&self) -> Result<(), ShellError> {
        let args = [OsString::from("forward"), OsString::from("--remove-all")];
        let out = self.run(args, FORWARD_TIMEOUT)?;
        if out.code != 0 {
            return Err(ShellError::Failed {
                command: "forward --remove-all".into(),
                code: out.code,
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parse `adb devices` output into the serials of ready devices.
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of devices") && !l.starts_with('*'))
        .filter_map(|l| {
            let mut cols = l.split_whitespace();
            match (cols.next(), cols.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_list_keeps_ready_devices() {
        let out = "List of devices attached\n\
                   emulator-5554\tdevice\n\
                   192.168.0.4:5555\tdevice\n\
                   0123456789ABCDEF\tunauthorized\n\
                   \n";
        assert_eq!(
            parse_device_list(out),
            vec!["emulator-5554".to_string(), "192.168.0.4:5555".to_string()]
        );
    }

    #[test]
    fn parse_device_list_ignores_daemon_banner() {
        let out = "* daemon not running; starting now at tcp:5037\n\
                   * daemon started successfully\n\
                   List of devices attached\n";
        assert!(parse_device_list(out).is_empty());
    }

    #[test]
    fn remote_missing_matches_adb_messages() {
        assert!(remote_missing(
            "adb: error: remote object '/system/bin/app_process' does not exist"
        ));
        assert!(remote_missing("remote stat failed: No such file or directory"));
        assert!(!remote_missing("error: device offline"));
    }

    #[test]
    fn missing_adb_binary_is_spawn_error() {
        let bridge = AdbBridge::new("/definitely/not/adb-xyz", Some("emulator-5554".into()));
        let err = bridge
            .execute("getprop", "", Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
    }

    #[test]
    fn serial_is_exposed() {
        let bridge = AdbBridge::new("adb", Some("R58M".into()));
        assert_eq!(bridge.serial(), Some("R58M"));
    }
}
