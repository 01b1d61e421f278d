//! Record ingestion: validate loosely-typed input into [`RawQueryRecord`]s.
//!
//! Accepts both the engine's own field names and the column names of
//! BigQuery's `INFORMATION_SCHEMA.JOBS` view (`creation_time`, `user_email`,
//! `total_bytes_billed`, ...). INT64 columns exported as JSON strings are
//! accepted too. Records that fail validation are skipped and counted.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, trace};

use crate::error::RecordError;
use crate::identity::ServiceAccountRules;
use crate::models::{RawQueryRecord, TableRef};

/// One input item as produced by a record source.
pub type SourceItem = std::result::Result<RecordInput, RecordError>;

/// Table reference as it appears in input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableRefInput {
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub table_id: Option<String>,
}

impl TableRefInput {
    fn validate(self, field: &'static str) -> Result<TableRef, RecordError> {
        match (self.project_id, self.dataset_id, self.table_id) {
            (Some(p), Some(d), Some(t)) if !d.is_empty() && !t.is_empty() => {
                Ok(TableRef::new(p, d, t))
            }
            _ => Err(RecordError::MissingField(field)),
        }
    }
}

/// Unvalidated query record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordInput {
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default, alias = "creation_time")]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,

    /// `None` = key absent (malformed); `Some(None)` = explicit null (unknown actor)
    #[serde(default, alias = "user_email", deserialize_with = "present")]
    pub actor_email: Option<Option<String>>,

    #[serde(default)]
    pub statement_type: Option<String>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default, alias = "total_bytes_processed", deserialize_with = "flexible_int")]
    pub bytes_processed: Option<i64>,

    #[serde(default, alias = "total_bytes_billed", deserialize_with = "flexible_int")]
    pub bytes_billed: Option<i64>,

    #[serde(default, alias = "total_slot_ms", deserialize_with = "flexible_int")]
    pub slot_milliseconds: Option<i64>,

    #[serde(default)]
    pub cache_hit: Option<bool>,

    #[serde(default)]
    pub has_error: Option<bool>,

    /// `INFORMATION_SCHEMA.JOBS` reports failures as a non-null struct
    #[serde(default)]
    pub error_result: Option<serde_json::Value>,

    #[serde(default)]
    pub destination_table: Option<TableRefInput>,

    #[serde(default)]
    pub referenced_tables: Option<Vec<TableRefInput>>,

    #[serde(default, alias = "query")]
    pub query_text: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

fn flexible_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(v)) => Ok(Some(v)),
        Some(IntOrString::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse RFC 3339 or BigQuery's `YYYY-MM-DD HH:MM:SS[.ffffff] UTC` form.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix(" UTC").unwrap_or(raw);
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(ts.and_utc());
        }
    }
    Err(RecordError::BadTimestamp(raw.to_string()))
}

/// Cut `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn non_negative(value: Option<i64>, field: &'static str) -> Result<u64, RecordError> {
    let value = value.ok_or(RecordError::MissingField(field))?;
    u64::try_from(value).map_err(|_| RecordError::Negative(field))
}

/// Validated records plus the skip count.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub records: Vec<RawQueryRecord>,
    pub skipped: u64,
}

/// Turns [`RecordInput`]s into [`RawQueryRecord`]s.
#[derive(Debug, Clone)]
pub struct Ingestor {
    rules: ServiceAccountRules,
    max_query_text_chars: usize,
}

impl Ingestor {
    pub fn new(rules: ServiceAccountRules, max_query_text_chars: usize) -> Self {
        Self {
            rules,
            max_query_text_chars,
        }
    }

    /// Validate one input.
    pub fn ingest(&self, input: RecordInput) -> Result<RawQueryRecord, RecordError> {
        let job_id = input
            .job_id
            .filter(|j| !j.is_empty())
            .ok_or(RecordError::MissingField("job_id"))?;
        let timestamp = parse_timestamp(
            input
                .timestamp
                .as_deref()
                .ok_or(RecordError::MissingField("timestamp"))?,
        )?;
        let project_id = input
            .project_id
            .filter(|p| !p.is_empty())
            .ok_or(RecordError::MissingField("project_id"))?;
        let actor_email = input
            .actor_email
            .ok_or(RecordError::MissingField("actor_email"))?
            .unwrap_or_default();

        let bytes_processed = non_negative(input.bytes_processed, "bytes_processed")?;
        let bytes_billed = non_negative(input.bytes_billed, "bytes_billed")?;
        let slot_milliseconds = non_negative(Some(input.slot_milliseconds.unwrap_or(0)), "slot_milliseconds")?;

        let destination_table = input
            .destination_table
            .map(|t| t.validate("destination_table"))
            .transpose()?;
        let referenced_tables = input
            .referenced_tables
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.validate("referenced_tables"))
            .collect::<Result<Vec<_>, _>>()?;

        let has_error = input.has_error.unwrap_or(false)
            || input.error_result.as_ref().is_some_and(|v| !v.is_null());
        let query_text = input.query_text.unwrap_or_default();

        let mut record = RawQueryRecord::new(job_id, timestamp, project_id, self.rules.classify(&actor_email))
            .with_bytes(bytes_processed, bytes_billed)
            .with_slot_ms(slot_milliseconds)
            .with_cache_hit(input.cache_hit.unwrap_or(false))
            .with_error(has_error)
            .with_referenced(referenced_tables)
            .with_query(truncate_chars(&query_text, self.max_query_text_chars));
        record.destination_table = destination_table;
        if let Some(statement_type) = input.statement_type {
            record.statement_type = statement_type;
        }
        if let Some(priority) = input.priority {
            record.priority = priority;
        }

        Ok(record)
    }

    /// Validate every item, skipping and counting the ones that fail.
    pub fn ingest_all(&self, items: impl IntoIterator<Item = SourceItem>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for (index, item) in items.into_iter().enumerate() {
            match item.and_then(|input| self.ingest(input)) {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    trace!(index, error = %e, "Skipping malformed record");
                    outcome.skipped += 1;
                }
            }
        }
        if outcome.skipped > 0 {
            debug!(
                skipped = outcome.skipped,
                accepted = outcome.records.len(),
                "Skipped malformed records during ingestion"
            );
        }
        outcome
    }
}

/// Parse one JSON line into a source item.
pub fn parse_line(line: &str) -> SourceItem {
    serde_json::from_str::<RecordInput>(line).map_err(|e| RecordError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorKind;
    use chrono::{TimeZone, Timelike};

    fn ingestor() -> Ingestor {
        Ingestor::new(ServiceAccountRules::default(), 10)
    }

    fn full_line() -> &'static str {
        r#"{"job_id":"bquxjob_1","timestamp":"2026-03-01T09:15:00Z","project_id":"analytics-prod","actor_email":"ana@example.com","statement_type":"MERGE","priority":"BATCH","bytes_processed":2048,"bytes_billed":10485760,"slot_milliseconds":7200000,"cache_hit":false,"has_error":false,"destination_table":{"project_id":"analytics-prod","dataset_id":"mart","table_id":"orders"},"referenced_tables":[{"project_id":"analytics-prod","dataset_id":"mart","table_id":"orders"},{"project_id":"analytics-prod","dataset_id":"raw","table_id":"events"}],"query_text":"MERGE mart.orders USING raw.events ..."}"#
    }

    #[test]
    fn test_ingest_full_record() {
        let record = ingestor().ingest(parse_line(full_line()).unwrap()).unwrap();

        assert_eq!(record.job_id, "bquxjob_1");
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2026, 3, 1, 9, 15, 0).unwrap());
        assert_eq!(record.actor.canonical_key, "ana@example.com");
        assert_eq!(record.actor.kind, ActorKind::User);
        assert_eq!(record.statement_type, "MERGE");
        assert_eq!(record.priority, "BATCH");
        assert_eq!(record.bytes_billed, 10_485_760);
        assert_eq!(record.slot_milliseconds, 7_200_000);
        assert_eq!(record.referenced_tables.len(), 2);
        assert_eq!(record.destination_table.unwrap().table_id, "orders");
        assert_eq!(record.query_text, "MERGE mart");
    }

    #[test]
    fn test_information_schema_aliases_and_string_ints() {
        let line = r#"{"job_id":"j2","creation_time":"2026-03-01 23:59:59.123456 UTC","project_id":"p","user_email":"loader@p.iam.gserviceaccount.com","total_bytes_processed":"100","total_bytes_billed":"10485760","total_slot_ms":"42","error_result":{"reason":"invalidQuery"},"query":"SELECT 1"}"#;
        let record = ingestor().ingest(parse_line(line).unwrap()).unwrap();

        assert!(record.actor.is_service_account());
        assert_eq!(record.bytes_processed, 100);
        assert_eq!(record.bytes_billed, 10_485_760);
        assert_eq!(record.slot_milliseconds, 42);
        assert!(record.has_error);
        assert!(record.referenced_tables.is_empty());
        assert_eq!(record.timestamp.hour(), 23);
        assert_eq!(record.priority, "INTERACTIVE");
    }

    #[test]
    fn test_null_actor_is_unknown_but_absent_actor_is_malformed() {
        let null_actor = r#"{"job_id":"j","timestamp":"2026-03-01T00:00:00Z","project_id":"p","actor_email":null,"bytes_processed":0,"bytes_billed":0}"#;
        let record = ingestor().ingest(parse_line(null_actor).unwrap()).unwrap();
        assert_eq!(record.actor.canonical_key, "Unknown");

        let no_actor = r#"{"job_id":"j","timestamp":"2026-03-01T00:00:00Z","project_id":"p","bytes_processed":0,"bytes_billed":0}"#;
        assert_eq!(
            ingestor().ingest(parse_line(no_actor).unwrap()).unwrap_err(),
            RecordError::MissingField("actor_email")
        );
    }

    #[test]
    fn test_missing_and_negative_fields_rejected() {
        let no_billed = r#"{"job_id":"j","timestamp":"2026-03-01T00:00:00Z","project_id":"p","actor_email":"a@b.c","bytes_processed":0}"#;
        assert_eq!(
            ingestor().ingest(parse_line(no_billed).unwrap()).unwrap_err(),
            RecordError::MissingField("bytes_billed")
        );

        let negative = r#"{"job_id":"j","timestamp":"2026-03-01T00:00:00Z","project_id":"p","actor_email":"a@b.c","bytes_processed":0,"bytes_billed":-5}"#;
        assert_eq!(
            ingestor().ingest(parse_line(negative).unwrap()).unwrap_err(),
            RecordError::Negative("bytes_billed")
        );

        let bad_ts = r#"{"job_id":"j","timestamp":"yesterday","project_id":"p","actor_email":"a@b.c","bytes_processed":0,"bytes_billed":0}"#;
        assert!(matches!(
            ingestor().ingest(parse_line(bad_ts).unwrap()).unwrap_err(),
            RecordError::BadTimestamp(_)
        ));
    }

    #[test]
    fn test_ingest_all_counts_skips() {
        let items = vec![
            parse_line(full_line()),
            parse_line("not json"),
            parse_line(r#"{"job_id":"x"}"#),
        ];
        let outcome = ingestor().ingest_all(items);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.skipped, 2);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
