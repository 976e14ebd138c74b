//! Host-side platform services for droidbridge: well-known directories,
//! log-file preparation and toolchain discovery.

pub mod error;
pub mod logging;
pub mod paths;
pub mod toolchain;

pub use error::PlatformError;
pub use logging::LogFileSettings;
pub use paths::{device_cache_path, sanitize_component, DefaultPaths, PlatformPaths};
pub use toolchain::{Candidate, ToolLocator};
