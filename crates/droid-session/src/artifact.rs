//! Host-side cache of binaries pulled from the device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use droid_device::Device;
use walkdir::WalkDir;

use crate::error::ArtifactError;

/// Result of [`ArtifactCache::ensure_cached`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Local copy of the remote file or directory.
    Found(PathBuf),
    /// The device does not have the path.
    Unavailable,
}

impl Artifact {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Artifact::Found(path) => Some(path),
            Artifact::Unavailable => None,
        }
    }
}

/// Pulls remote paths into a local directory once and reuses them.
///
/// The cache never deletes anything; a stale copy stays until removed by
/// hand.
#[derive(Debug)]
pub struct ArtifactCache {
    device: Arc<Device>,
    dir: PathBuf,
    found: Mutex<HashMap<String, PathBuf>>,
}

impl ArtifactCache {
    pub fn new(device: Arc<Device>, dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            dir: dir.into(),
            found: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `remote` lands locally: the basename for files, the last
    /// component for directories (`remote` ending in `/`).
    pub fn local_path(&self, remote: &str) -> Result<PathBuf, ArtifactError> {
        let name = remote
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .ok_or_else(|| ArtifactError::InvalidPath(remote.to_string()))?;
        Ok(self.dir.join(name))
    }

    /// Make sure a local copy of `remote` exists, pulling it if needed.
    pub fn ensure_cached(&self, remote: &str) -> Result<Artifact, ArtifactError> {
        if let Some(path) = self
            .found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(remote)
        {
            return Ok(Artifact::Found(path.clone()));
        }

        let local = self.local_path(remote)?;
        let is_dir = remote.ends_with('/');

        if is_present(&local, is_dir) {
            tracing::debug!(remote, local = %local.display(), "artifact already cached");
            return Ok(self.remember(remote, local));
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let pulled = self
            .device
            .pull(remote, &local)
            .map_err(|source| ArtifactError::Transport {
                remote: remote.to_string(),
                source,
            })?;

        if !pulled {
            tracing::info!(remote, "artifact not available on device");
            return Ok(Artifact::Unavailable);
        }
        tracing::info!(remote, local = %local.display(), "artifact pulled");
        Ok(self.remember(remote, local))
    }

    fn remember(&self, remote: &str, local: PathBuf) -> Artifact {
        self.found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(remote.to_string(), local.clone());
        Artifact::Found(local)
    }
}

fn is_present(local: &Path, is_dir: bool) -> bool {
    if is_dir {
        std::fs::read_dir(local)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    } else {
        local.is_file()
    }
}

/// `lib*.so` files under `dir`, recursively, in sorted order.
pub fn native_libraries(dir: &Path) -> Vec<PathBuf> {
    let mut libs: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with("lib") && name.ends_with(".so")
        })
        .map(walkdir::DirEntry::into_path)
        .collect();
    libs.sort();
    libs
}

#[cfg(test)]
mod tests {
    use super::*;
    use droid_device::ScriptedBridge;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ScriptedBridge>, ArtifactCache) {
        let tmp = TempDir::new().unwrap();
        let bridge = Arc::new(ScriptedBridge::new());
        let device = Device::connect("emulator-5554", bridge.clone()).unwrap();
        let cache = ArtifactCache::new(device, tmp.path().join("cache"));
        (tmp, bridge, cache)
    }

    #[test]
    fn pulls_once_then_reuses() {
        let (_tmp, bridge, cache) = setup();
        bridge.with_remote_file("/system/bin/linker", b"ELF".to_vec());

        let first = cache.ensure_cached("/system/bin/linker").unwrap();
        let second = cache.ensure_cached("/system/bin/linker").unwrap();

        assert_eq!(first, Artifact::Found(cache.dir().join("linker")));
        assert_eq!(first, second);
        assert_eq!(bridge.pull_count(), 1);
    }

    #[test]
    fn existing_local_copy_skips_transfer() {
        let (_tmp, bridge, cache) = setup();
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.dir().join("libc.so"), b"old").unwrap();

        let got = cache.ensure_cached("/system/lib/libc.so").unwrap();
        assert_eq!(got, Artifact::Found(cache.dir().join("libc.so")));
        assert_eq!(bridge.pull_count(), 0);
    }

    #[test]
    fn missing_remote_is_unavailable_and_retried() {
        let (_tmp, bridge, cache) = setup();
        assert_eq!(
            cache.ensure_cached("/system/bin/app_process").unwrap(),
            Artifact::Unavailable
        );
        assert_eq!(
            cache.ensure_cached("/system/bin/app_process").unwrap(),
            Artifact::Unavailable
        );
        assert_eq!(bridge.pull_count(), 2);
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn transport_failure_is_an_error() {
        let (_tmp, bridge, cache) = setup();
        bridge
            .with_remote_file("/system/lib/libc.so", b"x".to_vec())
            .break_transfer("/system/lib/libc.so");
        let err = cache.ensure_cached("/system/lib/libc.so").unwrap_err();
        assert!(matches!(err, ArtifactError::Transport { .. }));
    }

    #[test]
    fn directory_is_mirrored_under_last_component() {
        let (_tmp, bridge, cache) = setup();
        bridge
            .with_remote_file("/data/data/com.example.app/lib/libgame.so", b"g".to_vec())
            .with_remote_file("/data/data/com.example.app/lib/arm/libaux.so", b"a".to_vec());

        let got = cache.ensure_cached("/data/data/com.example.app/lib/").unwrap();
        let lib_dir = cache.dir().join("lib");
        assert_eq!(got, Artifact::Found(lib_dir.clone()));
        assert_eq!(
            native_libraries(&lib_dir),
            vec![lib_dir.join("arm").join("libaux.so"), lib_dir.join("libgame.so")]
        );
    }

    #[test]
    fn empty_local_directory_is_not_a_hit() {
        let (_tmp, bridge, cache) = setup();
        std::fs::create_dir_all(cache.dir().join("lib")).unwrap();
        bridge.with_remote_file("/data/data/app/lib/libx.so", b"x".to_vec());

        cache.ensure_cached("/data/data/app/lib/").unwrap();
        assert_eq!(bridge.pull_count(), 1);
    }

    #[test]
    fn root_path_is_rejected() {
        let (_tmp, _bridge, cache) = setup();
        assert!(matches!(
            cache.ensure_cached("/"),
            Err(ArtifactError::InvalidPath(_))
        ));
    }

    #[test]
    fn native_libraries_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("libfoo.so"), b"").unwrap();
        std::fs::write(tmp.path().join("foo.so"), b"").unwrap();
        std::fs::write(tmp.path().join("libfoo.a"), b"").unwrap();
        assert_eq!(native_libraries(tmp.path()), vec![tmp.path().join("libfoo.so")]);
    }
}
