//! Error types for process-level setup.
//!
//! Aggregation errors live in `bqspend-engine`; this enum only covers what can
//! go wrong before a run starts (log directories, environment lookups).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the shared setup utilities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Required environment variable missing
    #[error("Environment variable {name} is not set")]
    MissingEnv { name: String },

    /// Logging subscriber could not be installed
    #[error("Failed to initialize logging: {message}")]
    LoggingInit { message: String },
}

impl CoreError {
    /// Create a MissingEnv error
    pub fn missing_env(name: impl Into<String>) -> Self {
        Self::MissingEnv { name: name.into() }
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::DirectoryCreation { .. } => Some("Pass --log-dir pointing at a writable directory"),
            Self::MissingEnv { .. } => Some("Set HOME or pass --log-dir explicitly"),
            Self::LoggingInit { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_error() {
        let err = CoreError::missing_env("HOME");
        assert!(err.to_string().contains("HOME"));
        assert!(err.guidance().is_some());
    }

    #[test]
    fn test_directory_creation_error_keeps_source() {
        let err = CoreError::DirectoryCreation {
            path: "/nope".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/nope"));
    }
}
