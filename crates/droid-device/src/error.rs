//! Device and shell error types.

use thiserror::Error;

/// Failures of a single bridge invocation.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The bridge executable could not be launched.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish before its deadline and was killed.
    #[error("`{command}` timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u128 },

    /// The bridge itself reported a failure (not a missing remote file).
    #[error("`{command}` failed with exit code {code}: {message}")]
    Failed {
        command: String,
        code: i32,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from device-level operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// A remote command ran but returned a non-zero exit code.
    #[error("[shell:{command}] returned error code {code}")]
    CommandFailed { command: String, code: i32 },

    /// A built-in parser pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = ShellError::Timeout {
            command: "shell ps".into(),
            timeout_ms: 1500,
        };
        assert_eq!(err.to_string(), "`shell ps` timed out after 1500 ms");
    }

    #[test]
    fn failed_display_includes_message() {
        let err = ShellError::Failed {
            command: "forward".into(),
            code: 1,
            message: "cannot bind".into(),
        };
        assert!(err.to_string().contains("cannot bind"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn command_failed_names_command() {
        let err = DeviceError::CommandFailed {
            command: "ps".into(),
            code: 2,
        };
        assert_eq!(err.to_string(), "[shell:ps] returned error code 2");
    }

    #[test]
    fn shell_error_converts_transparently() {
        let err: DeviceError = ShellError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe broken",
        ))
        .into();
        assert!(err.to_string().contains("pipe broken"));
    }
}
