pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{
    AdbConfig, CacheConfig, Config, CorrelationMode, FaultPolicySetting, GdbConfig, JdwpConfig,
    LogConfig, LogLevel, SessionConfig,
};
pub use error::ConfigError;
pub use load::{load_config, load_from_str};
