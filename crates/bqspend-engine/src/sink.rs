//! Persist pipeline output.
//!
//! Sinks write a complete [`RunOutput`] or nothing: [`JsonDirSink`] stages
//! files in a sibling directory and renames it into place, [`SqliteSink`]
//! writes inside one transaction.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, Transaction, params};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::DailyActorSummary;
use crate::pipeline::RunOutput;

/// Destination for one run's output.
pub trait SummarySink: Send + Sync {
    /// Persist `output` under `run_name` (usually the project). Returns the
    /// number of actor-day summaries written.
    fn write(&self, run_name: &str, output: &RunOutput) -> Result<usize>;
}

/// Reversible file name for an arbitrary label.
///
/// Bytes outside `[A-Za-z0-9@._-]` (including `%`) become `%XX`, so distinct
/// labels never share a file. `.` and `..` are encoded whole, and the empty
/// label becomes a lone `%`.
fn file_safe(name: &str) -> String {
    match name {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'@' | b'.' | b'-' | b'_') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    fs::write(path, bytes)?;
    Ok(())
}

/// Directory of JSON files.
///
/// Layout under `<root>/<run_name>/`:
///
/// ```text
/// report.json
/// profiles.json
/// daily/<date>/<project>/<actor>.json
/// datasets/<date>/<project>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Final directory for `run_name`.
    pub fn run_dir(&self, run_name: &str) -> PathBuf {
        self.root.join(file_safe(run_name))
    }

    fn stage(&self, dir: &Path, output: &RunOutput) -> Result<usize> {
        write_json(&dir.join("report.json"), &output.report)?;
        write_json(&dir.join("profiles.json"), &output.actor_profiles)?;

        for summary in &output.summaries {
            let path = dir
                .join("daily")
                .join(summary.date.to_string())
                .join(file_safe(&summary.project_id))
                .join(format!("{}.json", file_safe(&summary.actor)));
            write_json(&path, summary)?;
        }

        let mut by_day: Vec<(String, String, Vec<_>)> = Vec::new();
        for ds in &output.dataset_summaries {
            let date = ds.date.to_string();
            match by_day.last_mut() {
                Some((d, p, list)) if *d == date && *p == ds.project_id => list.push(ds),
                _ => by_day.push((date, ds.project_id.clone(), vec![ds])),
            }
        }
        for (date, project, list) in by_day {
            let path = dir
                .join("datasets")
                .join(date)
                .join(format!("{}.json", file_safe(&project)));
            write_json(&path, &list)?;
        }

        Ok(output.summaries.len())
    }
}

impl SummarySink for JsonDirSink {
    fn write(&self, run_name: &str, output: &RunOutput) -> Result<usize> {
        let target = self.run_dir(run_name);
        let name = file_safe(run_name);
        let staging = self.root.join(format!(".{name}.staging"));
        let previous = self.root.join(format!(".{name}.previous"));

        fs::create_dir_all(&self.root)?;
        for leftover in [&staging, &previous] {
            if leftover.exists() {
                fs::remove_dir_all(leftover)?;
            }
        }

        let written = match self.stage(&staging, output) {
            Ok(n) => n,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(dir = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                }
                return Err(e);
            }
        };

        if target.exists() {
            fs::rename(&target, &previous)?;
        }
        if let Err(e) = fs::rename(&staging, &target) {
            if previous.exists() {
                fs::rename(&previous, &target)?;
            }
            return Err(EngineError::Sink(format!(
                "failed to move {} into place: {e}",
                staging.display()
            )));
        }
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }

        info!(dir = %target.display(), summaries = written, "Wrote JSON summaries");
        Ok(written)
    }
}

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

fn sql_int(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| EngineError::Sink(format!("{field} {value} exceeds SQLite INTEGER range")))
}

/// SQLite database of summaries.
///
/// Re-writing the same (date, project, actor) replaces the earlier row, so
/// re-running a window is safe.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open or create a summary database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let sink = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        sink.migrate()?;
        Ok(sink)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Sink(format!("failed to acquire lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < SCHEMA_VERSION {
            info!(current = current_version, target = SCHEMA_VERSION, "Running database migrations");
            if current_version < 1 {
                Self::migration_v1(&conn)?;
            }
        }
        Ok(())
    }

    /// Migration to version 1: initial schema.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("Running migration v1: initial schema");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS daily_actor_summaries (
                date TEXT NOT NULL,
                project_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                is_service_account INTEGER NOT NULL,
                query_count INTEGER NOT NULL,
                cache_hit_count INTEGER NOT NULL,
                error_count INTEGER NOT NULL,
                total_bytes_processed INTEGER NOT NULL,
                total_bytes_billed INTEGER NOT NULL,
                estimated_cost_usd REAL NOT NULL,
                slot_hours REAL NOT NULL,
                cache_hit_percentage REAL NOT NULL,
                summary_json TEXT NOT NULL,
                PRIMARY KEY (date, project_id, actor)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_actor_project
                ON daily_actor_summaries(project_id, date);

            CREATE TABLE IF NOT EXISTS dataset_daily_summaries (
                date TEXT NOT NULL,
                project_id TEXT NOT NULL,
                dataset_key TEXT NOT NULL,
                query_count INTEGER NOT NULL,
                bytes_billed INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                rebuild_count INTEGER NOT NULL,
                summary_json TEXT NOT NULL,
                PRIMARY KEY (date, project_id, dataset_key)
            );

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_name TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                records_read INTEGER NOT NULL,
                records_skipped INTEGER NOT NULL,
                records_aggregated INTEGER NOT NULL,
                summaries INTEGER NOT NULL,
                written_at TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);",
        )?;

        info!("Migration v1 completed");
        Ok(())
    }

    fn write_in_tx(tx: &Transaction, run_name: &str, output: &RunOutput) -> Result<usize> {
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO daily_actor_summaries
             (date, project_id, actor, is_service_account, query_count, cache_hit_count,
              error_count, total_bytes_processed, total_bytes_billed, estimated_cost_usd,
              slot_hours, cache_hit_percentage, summary_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for s in &output.summaries {
            stmt.execute(params![
                s.date.to_string(),
                s.project_id,
                s.actor,
                s.is_service_account,
                sql_int(s.query_count, "query_count")?,
                sql_int(s.cache_hit_count, "cache_hit_count")?,
                sql_int(s.error_count, "error_count")?,
                sql_int(s.total_bytes_processed, "total_bytes_processed")?,
                sql_int(s.total_bytes_billed, "total_bytes_billed")?,
                s.estimated_cost_usd,
                s.slot_hours,
                s.cache_hit_percentage,
                serde_json::to_string(s)?,
            ])?;
        }

        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO dataset_daily_summaries
             (date, project_id, dataset_key, query_count, bytes_billed, cost_usd,
              rebuild_count, summary_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for ds in &output.dataset_summaries {
            stmt.execute(params![
                ds.date.to_string(),
                ds.project_id,
                ds.dataset_key,
                sql_int(ds.query_count, "query_count")?,
                sql_int(ds.bytes_billed, "bytes_billed")?,
                ds.cost_usd,
                sql_int(ds.rebuild_count, "rebuild_count")?,
                serde_json::to_string(ds)?,
            ])?;
        }

        let report = &output.report;
        tx.execute(
            "INSERT INTO runs
             (run_name, window_start, window_end, records_read, records_skipped,
              records_aggregated, summaries, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_name,
                report.window.start.to_string(),
                report.window.end.to_string(),
                sql_int(report.records_read, "records_read")?,
                sql_int(report.records_skipped, "records_skipped")?,
                sql_int(report.records_aggregated, "records_aggregated")?,
                sql_int(report.summaries, "summaries")?,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(output.summaries.len())
    }

    /// Stored actor-day summaries for `project_id`, ordered like pipeline output.
    pub fn load_summaries(&self, project_id: &str) -> Result<Vec<DailyActorSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT summary_json FROM daily_actor_summaries
             WHERE project_id = ?1
             ORDER BY date, actor",
        )?;
        let rows = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;

        let mut summaries = Vec::new();
        for json in rows {
            summaries.push(serde_json::from_str(&json?)?);
        }
        Ok(summaries)
    }

    /// Number of runs recorded for `run_name`.
    pub fn run_count(&self, run_name: &str) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE run_name = ?1",
            params![run_name],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl SummarySink for SqliteSink {
    fn write(&self, run_name: &str, output: &RunOutput) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let written = Self::write_in_tx(&tx, run_name, output)?;
        tx.commit()?;

        debug!(run = run_name, summaries = written, "Wrote summaries to SQLite");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe_names() {
        assert_eq!(file_safe("ana@example.com"), "ana@example.com");
        assert_eq!(file_safe("../etc/passwd"), "..%2Fetc%2Fpasswd");
        assert_eq!(file_safe(".."), "%2E%2E");
        assert_eq!(file_safe(""), "%");
        assert_eq!(file_safe("a b/c"), "a%20b%2Fc");
        assert_eq!(file_safe("büro"), "b%C3%BCro");
    }

    #[test]
    fn test_file_safe_names_never_collide() {
        let labels = [
            "ana+test@example.com",
            "ana_test@example.com",
            "ana%2Btest@example.com",
            "ana test@example.com",
            ".",
            "%2E",
            "",
            "%",
        ];
        let names: std::collections::HashSet<_> = labels.iter().map(|l| file_safe(l)).collect();
        assert_eq!(names.len(), labels.len());
    }

    #[test]
    fn test_sql_int_rejects_overflow() {
        assert_eq!(sql_int(42, "x").unwrap(), 42);
        assert!(matches!(sql_int(u64::MAX, "x"), Err(EngineError::Sink(_))));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spend.db");
        drop(SqliteSink::open(&path).unwrap());
        let sink = SqliteSink::open(&path).unwrap();
        assert_eq!(sink.run_count("p").unwrap(), 0);
    }
}
