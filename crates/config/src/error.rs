//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("root directory does not exist: {0}")]
    RootDirMissing(PathBuf),

    #[error("TLS certificate file is required when a key is set")]
    MissingTlsCert,

    #[error("TLS key file is required when a certificate is set")]
    MissingTlsKey,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid route glob {pattern:?}: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("invalid cron schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },
}
