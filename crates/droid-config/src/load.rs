use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Name of the per-project config directory searched upward from the
/// working directory.
pub const PROJECT_DIR_NAME: &str = ".droidbridge";

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# droidbridge configuration
# Uncomment and edit settings below to override defaults.

# [adb]
# path = "/opt/android-sdk/platform-tools/adb"
# serial = "emulator-5554"
# timeout_ms = 30000

# [gdb]
# host = "localhost"
# port = 5039
# command_timeout_ms = 10000
# correlation = "token"        # or "fifo"
# fault_policy = "auto_continue" # or "surface"

# [jdwp]
# port = 8700

# [session]
# library_paths = ["/path/to/project/obj/local/armeabi-v7a"]

# [log]
# level = "info"
"#;

/// Load and merge configuration.
///
/// 1. Reads `config_dir/config.toml`, creating it with commented-out
///    defaults when missing.
/// 2. Optionally reads the nearest `.droidbridge/config.toml` found by
///    walking upward from `project_dir`.
/// 3. Merges `Config::default() <- global <- project` and validates.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or
/// validation failure.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("created default config at {}", global_path.display());
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!("merging project config {}", project_path.display());
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    check(&config)?;
    Ok(config)
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    check(&config)?;
    Ok(config)
}

fn check(config: &Config) -> Result<(), ConfigError> {
    validate(config).map_err(|errors| {
        for extra in errors.iter().skip(1) {
            tracing::warn!("additional config problem: {extra}");
        }
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}

/// Walk from `start` upward looking for `.droidbridge/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_DIR_NAME).join("config.toml"))
        .find(|candidate| candidate.is_file())
}

fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_config_creates_default_when_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config, Config::default());
        assert!(cfg_dir.join("config.toml").exists());
    }

    #[test]
    fn load_config_reads_existing_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), "[gdb]\nport = 6001\n").unwrap();

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config.gdb.port, 6001);
        assert_eq!(config.jdwp.port, 8700);
    }

    #[test]
    fn load_config_merges_project_over_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[adb]\nserial = \"global\"\n[gdb]\nport = 6001\n",
        )
        .unwrap();

        let proj_dir = tmp.path().join("project");
        let dot_dir = proj_dir.join(PROJECT_DIR_NAME);
        std::fs::create_dir_all(&dot_dir).unwrap();
        std::fs::write(dot_dir.join("config.toml"), "[adb]\nserial = \"project\"\n").unwrap();

        let nested = proj_dir.join("app").join("jni");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_config(&cfg_dir, Some(&nested)).unwrap();
        assert_eq!(config.adb.serial.as_deref(), Some("project"));
        assert_eq!(config.gdb.port, 6001);
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), "[gdb]\nport = 0\n").unwrap();

        let err = load_config(&cfg_dir, None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn load_from_str_rejects_invalid_toml() {
        assert!(matches!(load_from_str("{{bad}}"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn default_config_content_is_comment_only() {
        assert!(!has_non_comment_content(DEFAULT_CONFIG_CONTENT));
    }

    #[test]
    fn has_non_comment_content_detects_values() {
        assert!(!has_non_comment_content(""));
        assert!(!has_non_comment_content("# comment\n"));
        assert!(has_non_comment_content("# comment\nport = 4\n"));
    }
}
