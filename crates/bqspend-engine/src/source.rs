//! Record sources.
//!
//! A [`RecordSource`] hands the pipeline every input item for one run. Item
//! level problems (a malformed line) are reported inside the returned vector
//! and become skips; anything that prevents reading the source at all is a
//! [`SourceError`] and aborts the run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use bqspend_core::recovery::{RetryConfig, retry_with_backoff};
use tracing::{debug, warn};

use crate::error::{RecordError, SourceError};
use crate::ingest::{SourceItem, parse_line};

/// Anything that can enumerate raw records for a run.
pub trait RecordSource: Send + Sync {
    /// Short label used in logs and reports (usually the project).
    fn name(&self) -> &str;

    /// Fetch every item. Called once per run.
    fn fetch(&self) -> Result<Vec<SourceItem>, SourceError>;
}

/// Fetch from `source`, retrying transient failures with backoff.
pub fn fetch_with_retry(
    source: &dyn RecordSource,
    retry: RetryConfig,
) -> Result<Vec<SourceItem>, SourceError> {
    let outcome = retry_with_backoff(retry, || source.fetch());
    if outcome.attempts > 1 {
        debug!(
            source = source.name(),
            attempts = outcome.attempts,
            elapsed_ms = outcome.total_duration.as_millis() as u64,
            "Record fetch needed retries"
        );
    }
    outcome.result
}

/// JSON-lines export: one record object per line.
///
/// Blank lines and `--` or `#` comment lines are ignored. Every other line is
/// an item: one that is not valid UTF-8, not a JSON object, or not a valid
/// record becomes a skip.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    name: String,
    path: PathBuf,
}

impl JsonLinesSource {
    /// Source named after the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every `*.jsonl` file in `dir`, sorted by path.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Vec<Self>, SourceError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(SourceError::NoData(format!("directory not found: {}", dir.display())));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths.into_iter().map(Self::new).collect())
    }
}

impl RecordSource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<SourceItem>, SourceError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NoData(format!(
                    "export not found: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(SourceError::Io(e)),
        };

        let mut items = Vec::new();
        for (index, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw?;
            let line_number = index + 1;
            let item = match String::from_utf8(raw) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if is_banner(trimmed) {
                        continue;
                    }
                    if trimmed.starts_with('{') {
                        parse_line(trimmed)
                    } else {
                        Err(RecordError::Malformed("line is not a JSON object".to_string()))
                    }
                }
                Err(e) => Err(RecordError::Malformed(format!(
                    "invalid UTF-8 at byte {}",
                    e.utf8_error().valid_up_to()
                ))),
            };
            if let Err(ref e) = item {
                warn!(file = %self.path.display(), line = line_number, error = %e, "Malformed record line");
            }
            items.push(item);
        }

        debug!(file = %self.path.display(), count = items.len(), "Read record export");
        Ok(items)
    }
}

/// Blank lines and `--` / `#` comment lines carry no record.
fn is_banner(line: &str) -> bool {
    line.is_empty() || line.starts_with("--") || line.starts_with('#')
}

/// In-memory source for already-built inputs.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    items: Vec<SourceItem>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, items: Vec<SourceItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// Source whose items are the given JSON lines.
    pub fn from_json_lines<'a>(name: impl Into<String>, lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(name, lines.into_iter().map(parse_line).collect())
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<SourceItem>, SourceError> {
        Ok(self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const EXPORT: &str = r#"-- exported from INFORMATION_SCHEMA.JOBS
{"job_id":"a","timestamp":"2026-03-01T10:00:00Z","project_id":"p","actor_email":"x@example.com","bytes_processed":1,"bytes_billed":1}

{"job_id":"b", broken
{"job_id":"c","timestamp":"2026-03-01T11:00:00Z","project_id":"p","actor_email":"y@example.com","bytes_processed":2,"bytes_billed":2}
"#;

    #[test]
    fn test_json_lines_source_reads_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics-prod.jsonl");
        std::fs::write(&path, EXPORT).unwrap();

        let source = JsonLinesSource::new(&path);
        assert_eq!(source.name(), "analytics-prod");

        let items = source.fetch().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(items[2].is_ok());
    }

    #[test]
    fn test_invalid_utf8_line_is_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.jsonl");
        let mut bytes = br#"{"job_id":"a","timestamp":"2026-03-01T10:00:00Z","project_id":"p","actor_email":"x@example.com","bytes_processed":1,"bytes_billed":1}"#.to_vec();
        bytes.extend_from_slice(b"\r\n{\"job_id\":\"b\xff\"}\n");
        std::fs::write(&path, bytes).unwrap();

        let items = JsonLinesSource::new(&path).fetch().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RecordError::Malformed(ref m)) if m.contains("UTF-8")));
    }

    #[test]
    fn test_non_object_lines_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.jsonl");
        std::fs::write(&path, "# header\n[{\"job_id\":\"a\"},\n  \n-- footer\n").unwrap();

        let source = JsonLinesSource::new(&path);
        assert_eq!(source.path(), path.as_path());
        let items = source.fetch().unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RecordError::Malformed(_))));
    }

    #[test]
    fn test_missing_export_is_no_data() {
        let source = JsonLinesSource::new("/no/such/export.jsonl");
        assert!(matches!(source.fetch(), Err(SourceError::NoData(_))));
    }

    #[test]
    fn test_from_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let sources = JsonLinesSource::from_directory(dir.path()).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    struct FlakySource {
        failures_left: AtomicU32,
    }

    impl RecordSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch(&self) -> Result<Vec<SourceItem>, SourceError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SourceError::Unreachable("connection reset".into()));
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_fetch_with_retry_recovers_from_transient_failures() {
        let source = FlakySource {
            failures_left: AtomicU32::new(2),
        };
        let retry = RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
        };
        assert!(fetch_with_retry(&source, retry).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_with_retry_gives_up() {
        let source = FlakySource {
            failures_left: AtomicU32::new(10),
        };
        let retry = RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
        };
        assert!(matches!(
            fetch_with_retry(&source, retry),
            Err(SourceError::Unreachable(_))
        ));
    }
}
