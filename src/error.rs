//! Error types for cell image compilation and orchestration

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for cell image operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid cell image configuration (duplicate names, conflicting ports,
    /// malformed dependency strings, incomplete OIDC credentials)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem error, wrapped with the offending path
    #[error("{}: {source}", path.display())]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization/deserialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cluster orchestration error (job submission, status queries)
    #[error("orchestration error: {0}")]
    Orchestration(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an I/O error wrapping the offending path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an orchestration error with the given message
    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }
}
