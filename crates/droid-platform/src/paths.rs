use std::path::{Path, PathBuf};

use crate::error::PlatformError;

/// Standard host directories used by droidbridge.
pub trait PlatformPaths: Send + Sync {
    /// Returns the configuration directory (`~/.config/droidbridge`).
    fn config_dir(&self) -> PathBuf;
    /// Returns the data directory (`~/.local/share/droidbridge`).
    fn data_dir(&self) -> PathBuf;
    /// Returns the root of the device artifact cache (`~/.cache/droidbridge`).
    fn cache_dir(&self) -> PathBuf;
    /// Returns the log directory (`<data_dir>/logs`).
    fn log_dir(&self) -> PathBuf;

    /// Per-device, per-process artifact cache directory under
    /// [`cache_dir`](Self::cache_dir). See [`device_cache_path`].
    fn device_cache_dir(&self, device_id: &str, process_name: &str) -> PathBuf {
        device_cache_path(&self.cache_dir(), device_id, process_name)
    }
}

/// `<root>/<device id>/<process name>`, each component passed through
/// [`sanitize_component`] so network serials such as `192.168.0.4:5555`
/// stay valid path segments.
pub fn device_cache_path(root: &Path, device_id: &str, process_name: &str) -> PathBuf {
    root.join(sanitize_component(device_id))
        .join(sanitize_component(process_name))
}

/// Default implementation of [`PlatformPaths`] rooted at the user's home
/// directory, resolved through the `dirs` crate.
pub struct DefaultPaths {
    home: PathBuf,
    cache_override: Option<PathBuf>,
}

impl DefaultPaths {
    /// Creates a new `DefaultPaths` instance, resolving the home directory.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Path` if the home directory cannot be
    /// determined.
    pub fn new() -> Result<Self, PlatformError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
            .ok_or_else(|| PlatformError::Path("could not determine home directory".into()))?;
        Ok(Self {
            home,
            cache_override: None,
        })
    }

    /// Replace the artifact cache root (e.g. from `[cache] root` in config).
    pub fn with_cache_root(mut self, root: Option<PathBuf>) -> Self {
        self.cache_override = root;
        self
    }
}

impl PlatformPaths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("droidbridge")
    }

    fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join("droidbridge")
    }

    fn cache_dir(&self) -> PathBuf {
        match &self.cache_override {
            Some(root) => root.clone(),
            None => self.home.join(".cache").join("droidbridge"),
        }
    }

    fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// An empty input maps to `_` so the result is always a usable segment.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_paths() -> DefaultPaths {
        DefaultPaths::new().expect("should resolve home directory")
    }

    #[test]
    fn config_dir_ends_with_config_droidbridge() {
        let config = make_paths().config_dir();
        assert!(
            config.ends_with(".config/droidbridge"),
            "got: {:?}",
            config
        );
    }

    #[test]
    fn log_dir_is_under_data_dir() {
        let paths = make_paths();
        assert!(paths.log_dir().starts_with(paths.data_dir()));
    }

    #[test]
    fn cache_root_override_wins() {
        let paths = make_paths().with_cache_root(Some(PathBuf::from("/srv/cache")));
        assert_eq!(paths.cache_dir(), PathBuf::from("/srv/cache"));
    }

    #[test]
    fn device_cache_dir_is_deterministic() {
        let paths = make_paths().with_cache_root(Some(PathBuf::from("/c")));
        let a = paths.device_cache_dir("emulator-5554", "com.example.app");
        let b = paths.device_cache_dir("emulator-5554", "com.example.app");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/c/emulator-5554/com.example.app"));
    }

    #[test]
    fn device_cache_dir_sanitizes_network_serial() {
        let paths = make_paths().with_cache_root(Some(PathBuf::from("/c")));
        let dir = paths.device_cache_dir("192.168.0.4:5555", "app");
        assert_eq!(dir, PathBuf::from("/c/192.168.0.4_5555/app"));
    }

    #[test]
    fn sanitize_component_edge_cases() {
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
    }

    #[test]
    fn default_paths_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DefaultPaths>();
    }
}
