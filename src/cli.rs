use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Attach host debuggers to Android processes", long_about = None)]
pub struct Cli {
    /// Configuration directory (defaults to ~/.config/droidbridge).
    #[arg(long, value_name = "DIR", env = "DROIDBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device serial; overrides `[adb] serial`.
    #[arg(long, short = 's', env = "ANDROID_SERIAL")]
    pub serial: Option<String>,

    /// Log to stderr instead of the log file.
    #[arg(long)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print device properties, or a single one.
    Props { key: Option<String> },

    /// List processes on the device.
    Ps {
        /// Only processes with this exact name.
        #[arg(long)]
        name: Option<String>,
        /// Only this pid.
        #[arg(long)]
        pid: Option<u32>,
        #[arg(long)]
        json: bool,
    },

    /// Forward the gdbserver port, pull system binaries and print the init script.
    Setup { process: String },

    /// Prepare a session and drive gdb interactively.
    Gdb { process: String },

    /// Forward the JDWP port of a VM process and run jdb against it.
    Jdwp { process: String },

    /// Remove every port forward on the device.
    Teardown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_and_subcommand() {
        let cli = Cli::try_parse_from([
            "droidbridge",
            "--serial",
            "emulator-5554",
            "--log-stderr",
            "ps",
            "--name",
            "com.example.app",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.serial.as_deref(), Some("emulator-5554"));
        assert!(cli.log_stderr);
        match cli.command {
            Command::Ps { name, pid, json } => {
                assert_eq!(name.as_deref(), Some("com.example.app"));
                assert_eq!(pid, None);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn process_argument_is_required() {
        assert!(Cli::try_parse_from(["droidbridge", "gdb"]).is_err());
        let cli = Cli::try_parse_from(["droidbridge", "setup", "com.example.app"]).unwrap();
        assert!(matches!(cli.command, Command::Setup { process } if process == "com.example.app"));
    }

    #[test]
    fn props_key_is_optional() {
        let cli = Cli::try_parse_from(["droidbridge", "props"]).unwrap();
        assert!(matches!(cli.command, Command::Props { key: None }));
    }
}
