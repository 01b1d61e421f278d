//! Error types for the aggregation engine.

use bqspend_core::Retryable;
use thiserror::Error;

/// Errors from a record source. Any of these aborts the run.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source exists but could not be reached (retryable)
    #[error("record source unreachable: {0}")]
    Unreachable(String),

    /// The source was reached but has no data for the request yet
    #[error("no data available: {0}")]
    NoData(String),

    /// IO error while reading the source
    #[error("IO error reading records: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Unreachable(_) => true,
            SourceError::NoData(_) => false,
            SourceError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
        }
    }
}

/// Why a single record was rejected during ingestion. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Required field missing or null
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Byte or slot counter below zero
    #[error("field `{0}` must not be negative")]
    Negative(&'static str),

    /// Timestamp not in a recognized format
    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),

    /// Line is not a JSON object of the expected shape
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Engine errors. Any of these aborts the run and discards partial output.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected before aggregation
    #[error("configuration error: {0}")]
    Config(#[from] bqspend_config::ConfigError),

    /// Record source could not be reached
    #[error("record source unavailable: {0}")]
    SourceUnavailable(String),

    /// Record source has nothing for this run yet
    #[error("no data available: {0}")]
    NoData(String),

    /// Caller passed inputs that do not line up
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sink failed to persist summaries
    #[error("sink error: {0}")]
    Sink(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A pool worker panicked or was cancelled
    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NoData(msg) => EngineError::NoData(msg),
            other => EngineError::SourceUnavailable(other.to_string()),
        }
    }
}

impl EngineError {
    /// True for "nothing to aggregate yet", as opposed to a broken source.
    pub fn is_no_data(&self) -> bool {
        matches!(self, EngineError::NoData(_))
    }

    /// True when the source could not be reached at all.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, EngineError::SourceUnavailable(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_map_to_distinct_kinds() {
        let no_data: EngineError = SourceError::NoData("2026-03-01".into()).into();
        assert!(no_data.is_no_data());
        assert!(!no_data.is_source_unavailable());

        let down: EngineError = SourceError::Unreachable("timeout".into()).into();
        assert!(down.is_source_unavailable());
        assert!(!down.is_no_data());

        let io: EngineError =
            SourceError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).into();
        assert!(io.is_source_unavailable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Unreachable("x".into()).is_retryable());
        assert!(!SourceError::NoData("x".into()).is_retryable());
        assert!(!SourceError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")).is_retryable());
        assert!(SourceError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "x")).is_retryable());
    }

    #[test]
    fn test_config_error_message_names_option() {
        let err: EngineError = bqspend_config::EngineConfig::default()
            .with_cost_per_terabyte(-2.0)
            .validate()
            .unwrap_err()
            .into();
        assert!(err.to_string().contains("cost_per_terabyte"));
    }
}
