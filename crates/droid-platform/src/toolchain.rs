//! Locating host tools (`adb`, `gdb`, `jdb`).
//!
//! Discovery is an ordered list of [`Candidate`] locations. The first one
//! that yields an existing file wins; nothing here reads global state
//! except through the lookup function handed to [`ToolLocator::resolve_with`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::PlatformError;

/// One place a tool may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// An explicit path to the executable itself.
    File(PathBuf),
    /// A directory expected to contain the executable.
    Dir(PathBuf),
    /// `$VAR/<subdir>` when the environment variable is set and non-empty.
    EnvDir { var: String, subdir: PathBuf },
    /// The `PATH` search.
    SearchPath,
}

/// Resolves a tool by trying candidates in order.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    candidates: Vec<Candidate>,
}

impl ToolLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, candidate: Candidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    /// `adb`: explicit path, then the SDK's `platform-tools`, then `PATH`.
    pub fn adb(explicit: Option<PathBuf>) -> Self {
        let mut locator = Self::new();
        if let Some(path) = explicit {
            locator = locator.with(Candidate::File(path));
        }
        locator
            .with(Candidate::EnvDir {
                var: "ANDROID_HOME".into(),
                subdir: PathBuf::from("platform-tools"),
            })
            .with(Candidate::EnvDir {
                var: "ANDROID_SDK_ROOT".into(),
                subdir: PathBuf::from("platform-tools"),
            })
            .with(Candidate::SearchPath)
    }

    /// `gdb`: explicit path, then the NDK prebuilt directory, then `PATH`.
    pub fn gdb(explicit: Option<PathBuf>) -> Self {
        let mut locator = Self::new();
        if let Some(path) = explicit {
            locator = locator.with(Candidate::File(path));
        }
        let host = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
        locator
            .with(Candidate::EnvDir {
                var: "ANDROID_NDK_ROOT".into(),
                subdir: Path::new("prebuilt").join(host).join("bin"),
            })
            .with(Candidate::SearchPath)
    }

    /// `jdb`: `$JAVA_HOME/bin`, then `PATH`.
    pub fn jdb() -> Self {
        Self::new()
            .with(Candidate::EnvDir {
                var: "JAVA_HOME".into(),
                subdir: PathBuf::from("bin"),
            })
            .with(Candidate::SearchPath)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Resolve `tool` against the process environment.
    pub fn resolve(&self, tool: &str) -> Result<PathBuf, PlatformError> {
        self.resolve_with(tool, |var| std::env::var_os(var))
    }

    /// Resolve `tool`, reading environment variables through `env`.
    pub fn resolve_with<F>(&self, tool: &str, env: F) -> Result<PathBuf, PlatformError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let exe = format!("{tool}{}", std::env::consts::EXE_SUFFIX);
        for candidate in &self.candidates {
            let found = match candidate {
                Candidate::File(path) => Some(path.clone()).filter(|p| p.is_file()),
                Candidate::Dir(dir) => Some(dir.join(&exe)).filter(|p| p.is_file()),
                Candidate::EnvDir { var, subdir } => env(var)
                    .filter(|v| !v.is_empty())
                    .map(|root| PathBuf::from(root).join(subdir).join(&exe))
                    .filter(|p| p.is_file()),
                Candidate::SearchPath => which::which(tool).ok(),
            };
            if let Some(path) = found {
                tracing::debug!(tool, path = %path.display(), "resolved tool");
                return Ok(path);
            }
        }
        Err(PlatformError::ToolNotFound {
            tool: tool.to_string(),
            tried: self.candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn exe(name: &str) -> String {
        format!("{name}{}", std::env::consts::EXE_SUFFIX)
    }

    #[test]
    fn first_existing_candidate_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let first = tmp.path().join("one");
        let second = tmp.path().join("two");
        touch(&first.join(exe("adb")));
        touch(&second.join(exe("adb")));

        let locator = ToolLocator::new()
            .with(Candidate::Dir(first.clone()))
            .with(Candidate::Dir(second));
        let found = locator.resolve_with("adb", |_| None).unwrap();
        assert_eq!(found, first.join(exe("adb")));
    }

    #[test]
    fn missing_candidates_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sdk = tmp.path().join("sdk");
        touch(&sdk.join("platform-tools").join(exe("adb")));

        let locator = ToolLocator::new()
            .with(Candidate::File(tmp.path().join("nope")))
            .with(Candidate::EnvDir {
                var: "ANDROID_HOME".into(),
                subdir: PathBuf::from("platform-tools"),
            });
        let found = locator
            .resolve_with("adb", |var| {
                (var == "ANDROID_HOME").then(|| sdk.clone().into_os_string())
            })
            .unwrap();
        assert!(found.starts_with(&sdk));
    }

    #[test]
    fn empty_env_var_is_ignored() {
        let locator = ToolLocator::new().with(Candidate::EnvDir {
            var: "JAVA_HOME".into(),
            subdir: PathBuf::from("bin"),
        });
        let err = locator
            .resolve_with("jdb", |_| Some(OsString::new()))
            .unwrap_err();
        assert!(matches!(err, PlatformError::ToolNotFound { tried: 1, .. }));
    }

    #[test]
    fn adb_locator_orders_explicit_path_first() {
        let locator = ToolLocator::adb(Some(PathBuf::from("/opt/adb")));
        assert_eq!(
            locator.candidates().first(),
            Some(&Candidate::File(PathBuf::from("/opt/adb")))
        );
        assert_eq!(locator.candidates().last(), Some(&Candidate::SearchPath));
    }
}
