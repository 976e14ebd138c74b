use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(ConfigError::Validation {
            field: field.to_string(),
            message,
        });
    };

    if config.adb.timeout_ms == 0 {
        fail("adb.timeout_ms", "must be greater than 0".into());
    }
    if config.gdb.host.trim().is_empty() {
        fail("gdb.host", "must not be empty".into());
    }
    if config.gdb.port == 0 {
        fail("gdb.port", "must be non-zero".into());
    }
    if config.gdb.command_timeout_ms == 0 {
        fail("gdb.command_timeout_ms", "must be greater than 0".into());
    }
    if config.jdwp.port == 0 {
        fail("jdwp.port", "must be non-zero".into());
    } else if config.jdwp.port == config.gdb.port {
        // Both tunnels forward the same local port otherwise.
        fail(
            "jdwp.port",
            format!("must differ from gdb.port ({})", config.gdb.port),
        );
    }
    if let Some(serial) = &config.adb.serial {
        if serial.trim().is_empty() {
            fail("adb.serial", "must not be blank when set".into());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
