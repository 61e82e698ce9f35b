//! Error types for configuration handling

use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("invalid configuration at {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("error loading credentials, environment variable {0} is empty")]
    EmptyEnvCredential(String),

    #[error("error loading credentials from file {path}: {source}")]
    CredentialFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("credential at {0} declares none of path, env or value")]
    EmptyCredential(String),
}

impl ConfigError {
    /// Build a validation error for a field path such as `targets[0].mount.path[1]`
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
