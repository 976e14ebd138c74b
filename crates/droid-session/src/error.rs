use std::fmt;
use std::path::PathBuf;

use droid_device::{DeviceError, ShellError};
use thiserror::Error;

/// Failures of [`crate::ArtifactCache`]. A missing remote path is not an
/// error; see [`crate::Artifact::Unavailable`].
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to transfer {remote}: {source}")]
    Transport {
        remote: String,
        #[source]
        source: DeviceError,
    },

    #[error("cannot derive a local name for {0}")]
    InvalidPath(String),

    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Named phases of [`crate::SessionSetup::prepare`] that can fail. Building
/// the init script cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Tunnel,
    ArtifactFetch,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStage::Tunnel => "tunnel",
            SetupStage::ArtifactFetch => "artifact fetch",
        })
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: SetupStage,
        #[source]
        source: Box<SessionError>,
    },

    #[error("port forwarding failed: {0}")]
    Tunnel(#[source] ShellError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("cannot create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target process outlived the device it was listed on.
    #[error("device for process {pid} is gone")]
    DeviceGone { pid: u32 },
}

impl SessionError {
    pub(crate) fn at(self, stage: SetupStage) -> Self {
        SessionError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The failing stage, when the error came out of `prepare`.
    pub fn stage(&self) -> Option<SetupStage> {
        match self {
            SessionError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
