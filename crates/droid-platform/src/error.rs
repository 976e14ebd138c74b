use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("path error: {0}")]
    Path(String),

    #[error("tool `{tool}` not found (tried {tried} locations)")]
    ToolNotFound { tool: String, tried: usize },

    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
