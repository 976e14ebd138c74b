use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How results are matched to commands on the MI wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Numeric token prefix on each command; results may interleave.
    #[default]
    Token,
    /// No tokens; one command outstanding at a time, oldest first.
    Fifo,
}

/// What to do when the target stops on a fault signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicySetting {
    #[default]
    AutoContinue,
    Surface,
}

/// `adb` invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Explicit path to the `adb` executable.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Device serial passed as `-s`; the single attached device when absent.
    #[serde(default)]
    pub serial: Option<String>,
    /// Timeout for shell commands, in milliseconds.
    #[serde(default = "default_adb_timeout")]
    pub timeout_ms: u64,
}

fn default_adb_timeout() -> u64 {
    30_000
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            serial: None,
            timeout_ms: default_adb_timeout(),
        }
    }
}

/// Native debugging (gdb / gdbserver) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdbConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_gdb_port")]
    pub port: u16,
    /// Per-command timeout, in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub correlation: CorrelationMode,
    #[serde(default)]
    pub fault_policy: FaultPolicySetting,
    /// Signals treated as unhandled faults by the fault policy.
    #[serde(default = "default_fault_signals")]
    pub fault_signals: Vec<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_gdb_port() -> u16 {
    5039
}

fn default_command_timeout() -> u64 {
    10_000
}

fn default_fault_signals() -> Vec<String> {
    vec!["SIGSEGV".into(), "SIGBUS".into(), "SIGILL".into()]
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            host: default_host(),
            port: default_gdb_port(),
            command_timeout_ms: default_command_timeout(),
            correlation: CorrelationMode::default(),
            fault_policy: FaultPolicySetting::default(),
            fault_signals: default_fault_signals(),
        }
    }
}

/// Java debugging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JdwpConfig {
    #[serde(default = "default_jdwp_port")]
    pub port: u16,
}

fn default_jdwp_port() -> u16 {
    8700
}

impl Default for JdwpConfig {
    fn default() -> Self {
        Self {
            port: default_jdwp_port(),
        }
    }
}

/// Artifact cache location.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Overrides the platform cache directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Session defaults.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Host-side source/library directories registered with the debugger.
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Overrides the platform log directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Top-level droidbridge configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adb: AdbConfig,
    #[serde(default)]
    pub gdb: GdbConfig,
    #[serde(default)]
    pub jdwp: JdwpConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
}
