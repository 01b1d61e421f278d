//! # bqspend-config
//!
//! Configuration for the cost-attribution engine.
//!
//! Every option has a default, so an empty YAML document (or no file at all)
//! yields a usable [`EngineConfig`]. Call [`EngineConfig::validate`] before
//! handing the config to a pipeline; the engine does so itself on every run.
//!
//! ```yaml
//! cost_per_terabyte: 6.25
//! history_window_days: 14
//! top_n_tables: 50
//! service_account_prefixes: ["service-", "svc-"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// BigQuery on-demand list price per TiB scanned.
pub const DEFAULT_COST_PER_TERABYTE: f64 = 5.0;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_PATH_ENV: &str = "BQSPEND_CONFIG";

/// Longest accepted history window, roughly a century.
pub const MAX_HISTORY_WINDOW_DAYS: u32 = 36_500;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An option holds a value the engine cannot work with
    #[error("invalid value for `{option}`: {message}")]
    Invalid { option: &'static str, message: String },

    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for this schema
    #[error("invalid YAML in config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(option: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            message: message.into(),
        }
    }

    /// Name of the offending option, if the error is about one.
    pub fn option(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { option, .. } => Some(option),
            _ => None,
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// USD charged per 2^40 billed bytes
    pub cost_per_terabyte: f64,

    /// Number of trailing days (ending at the run's as-of date) to aggregate
    pub history_window_days: u32,

    /// Cap for `dataset_costs` and dataset-level actor rankings
    pub top_n_datasets: usize,

    /// Cap for `table_costs`
    pub top_n_tables: usize,

    /// Cap for `recent_queries`
    pub top_n_recent_queries: usize,

    /// Actor emails ending with one of these are service accounts
    pub service_account_domain_suffixes: Vec<String>,

    /// Actor emails starting with one of these are service accounts
    pub service_account_prefixes: Vec<String>,

    /// Query text is truncated to this many characters at ingestion
    pub max_query_text_chars: usize,

    /// Concurrent project pipelines
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cost_per_terabyte: DEFAULT_COST_PER_TERABYTE,
            history_window_days: 30,
            top_n_datasets: 10,
            top_n_tables: 100,
            top_n_recent_queries: 100,
            service_account_domain_suffixes: vec![".gserviceaccount.com".to_string()],
            service_account_prefixes: vec!["service-".to_string()],
            max_query_text_chars: 1000,
            workers: 4,
        }
    }
}

impl EngineConfig {
    /// Load a config from a YAML file. Missing options take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Load from `path` if given, else from `$BQSPEND_CONFIG`, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match std::env::var_os(CONFIG_PATH_ENV) {
                Some(p) => Self::load(PathBuf::from(p)),
                None => Ok(Self::default()),
            },
        }
    }

    /// Parse a config from YAML text. An empty document yields the defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reject values the engine cannot work with, naming the first bad option.
    pub fn validate(&self) -> Result<()> {
        if !self.cost_per_terabyte.is_finite() {
            return Err(ConfigError::invalid("cost_per_terabyte", "must be a finite number"));
        }
        if self.cost_per_terabyte < 0.0 {
            return Err(ConfigError::invalid(
                "cost_per_terabyte",
                format!("must not be negative (got {})", self.cost_per_terabyte),
            ));
        }
        if self.history_window_days == 0 {
            return Err(ConfigError::invalid("history_window_days", "must be at least 1"));
        }
        if self.history_window_days > MAX_HISTORY_WINDOW_DAYS {
            return Err(ConfigError::invalid(
                "history_window_days",
                format!(
                    "must be at most {MAX_HISTORY_WINDOW_DAYS} (got {})",
                    self.history_window_days
                ),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.service_account_domain_suffixes.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "service_account_domain_suffixes",
                "entries must not be empty",
            ));
        }
        if self.service_account_prefixes.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "service_account_prefixes",
                "entries must not be empty",
            ));
        }
        Ok(())
    }

    /// Set the price per TiB billed.
    pub fn with_cost_per_terabyte(mut self, cost: f64) -> Self {
        self.cost_per_terabyte = cost;
        self
    }

    /// Set the history window length.
    pub fn with_history_window_days(mut self, days: u32) -> Self {
        self.history_window_days = days;
        self
    }

    /// Set all three top-N caps at once.
    pub fn with_top_n(mut self, datasets: usize, tables: usize, recent_queries: usize) -> Self {
        self.top_n_datasets = datasets;
        self.top_n_tables = tables;
        self.top_n_recent_queries = recent_queries;
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}
