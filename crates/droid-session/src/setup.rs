//! Native debug session preparation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use droid_device::{Device, ForwardTarget, Process};
use droid_platform::device_cache_path;

use crate::artifact::{native_libraries, Artifact, ArtifactCache};
use crate::error::{SessionError, SetupStage};

pub const DEFAULT_GDB_PORT: u16 = 5039;

const LINKER: &str = "/system/bin/linker";
const LIBC: &str = "/system/lib/libc.so";
const APP_PROCESS: &str = "/system/bin/app_process";

/// Caller-supplied knobs for [`SessionSetup::new`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    /// Root under which per-device, per-process cache directories are made.
    pub cache_root: PathBuf,
    /// Host source and library directories handed to the debugger.
    pub library_paths: Vec<PathBuf>,
}

impl SessionOptions {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_GDB_PORT,
            cache_root: cache_root.into(),
            library_paths: Vec::new(),
        }
    }
}

/// Resolved, immutable session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub process: Arc<Process>,
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub search_paths: Vec<PathBuf>,
}

impl SessionConfig {
    /// `host:port` for `target remote`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tunnel, artifacts and init script for attaching gdb to one process.
#[derive(Debug)]
pub struct SessionSetup {
    device: Arc<Device>,
    config: SessionConfig,
    cache: ArtifactCache,
}

impl SessionSetup {
    /// Resolve the cache directory for `process` and create it.
    pub fn new(process: Arc<Process>, options: SessionOptions) -> Result<Self, SessionError> {
        let device = process
            .device()
            .ok_or(SessionError::DeviceGone { pid: process.pid })?;
        let cache_dir = device_cache_path(&options.cache_root, device.id(), &process.name);
        std::fs::create_dir_all(&cache_dir).map_err(|source| SessionError::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        let cache = ArtifactCache::new(device.clone(), cache_dir.clone());
        Ok(Self {
            device,
            config: SessionConfig {
                process,
                host: options.host,
                port: options.port,
                cache_dir,
                search_paths: options.library_paths,
            },
            cache,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Forward the local debugger port to the same port on the device.
    pub fn establish_tunnel(&self) -> Result<(), SessionError> {
        let port = self.config.port;
        tracing::info!(port, device = %self.device.id(), "forwarding debugger port");
        self.device
            .bridge()
            .forward(port, ForwardTarget::Tcp(port))
            .map_err(SessionError::Tunnel)
    }

    /// Remove every forward on the device, not only this session's.
    pub fn teardown_tunnel(&self) -> Result<(), SessionError> {
        tracing::info!(device = %self.device.id(), "clearing port forwards");
        self.device
            .bridge()
            .clear_all_forwards()
            .map_err(SessionError::Tunnel)
    }

    /// Pull the system binaries and app libraries gdb needs for symbols.
    /// Paths the device does not have are left out of the result.
    pub fn fetch_required_artifacts(&self) -> Result<Vec<PathBuf>, SessionError> {
        let mut fetched = Vec::new();
        for remote in [LINKER, LIBC, APP_PROCESS] {
            if let Artifact::Found(path) = self.cache.ensure_cached(remote)? {
                fetched.push(path);
            }
        }

        let lib_dir = self.config.process.native_library_directory();
        if let Artifact::Found(dir) = self.cache.ensure_cached(&lib_dir)? {
            for lib in native_libraries(&dir) {
                if !fetched.contains(&lib) {
                    fetched.push(lib);
                }
            }
        }
        tracing::info!(count = fetched.len(), "device binaries cached");
        Ok(fetched)
    }

    /// Commands that prepare gdb before `target remote`.
    pub fn build_init_script(&self) -> Vec<String> {
        let mut script = vec![
            "set target-async on".to_string(),
            "set breakpoint pending on".to_string(),
        ];

        if !self.config.search_paths.is_empty() {
            let dirs: Vec<String> = self
                .config
                .search_paths
                .iter()
                .map(|p| posix(p))
                .collect();
            script.push(format!("directory {}", dirs.join(" ")));
        }

        let cache = posix(&self.config.cache_dir);
        script.push(format!("set solib-search-path {cache}:{cache}/lib"));

        let launcher = self.config.cache_dir.join("app_process");
        if launcher.is_file() {
            script.push(format!("file {}", posix(&launcher)));
        }
        script
    }

    /// Tunnel, artifacts, then script. Errors name the stage that failed.
    pub fn prepare(&self) -> Result<Vec<String>, SessionError> {
        self.establish_tunnel()
            .map_err(|e| e.at(SetupStage::Tunnel))?;
        self.fetch_required_artifacts()
            .map_err(|e| e.at(SetupStage::ArtifactFetch))?;
        let script = self.build_init_script();
        tracing::debug!(lines = script.len(), "init script built");
        Ok(script)
    }
}

fn posix(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}
