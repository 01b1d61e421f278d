//! Data models for cost attribution.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Bytes in one TiB; BigQuery bills "per TB" in binary units.
pub const BYTES_PER_TERABYTE: f64 = 1_099_511_627_776.0;

/// Milliseconds in one slot-hour.
pub const SLOT_MS_PER_HOUR: f64 = 3_600_000.0;

/// Round a money (or percentage) value to two decimal places for output.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts billed bytes into USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub cost_per_terabyte: f64,
}

impl Pricing {
    pub fn new(cost_per_terabyte: f64) -> Self {
        Self { cost_per_terabyte }
    }

    /// Unrounded cost for a (possibly fractional) number of billed bytes.
    pub fn cost_usd(&self, bytes_billed: f64) -> f64 {
        bytes_billed / BYTES_PER_TERABYTE * self.cost_per_terabyte
    }
}

/// Fully qualified table reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// `project.dataset.table`
    pub fn table_key(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }

    /// `project.dataset`
    pub fn dataset_key(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset_id)
    }

    /// Same dataset and table, ignoring the project.
    pub fn same_dataset_table(&self, other: &TableRef) -> bool {
        self.dataset_id == other.dataset_id && self.table_id == other.table_id
    }
}

/// Whether an actor is a person or an automated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    ServiceAccount,
}

/// Classified actor for one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorIdentity {
    /// Email as reported, or `"Unknown"` when blank
    pub canonical_key: String,
    pub kind: ActorKind,
}

impl ActorIdentity {
    pub fn is_service_account(&self) -> bool {
        self.kind == ActorKind::ServiceAccount
    }
}

/// A validated query-execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQueryRecord {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    pub actor: ActorIdentity,
    pub statement_type: String,
    pub priority: String,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub slot_milliseconds: u64,
    pub cache_hit: bool,
    pub has_error: bool,
    pub destination_table: Option<TableRef>,
    pub referenced_tables: Vec<TableRef>,
    pub query_text: String,
}

impl RawQueryRecord {
    /// Create a record with zeroed usage; fill the rest with the `with_*` setters.
    pub fn new(
        job_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        project_id: impl Into<String>,
        actor: ActorIdentity,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            timestamp,
            project_id: project_id.into(),
            actor,
            statement_type: "SELECT".to_string(),
            priority: "INTERACTIVE".to_string(),
            bytes_processed: 0,
            bytes_billed: 0,
            slot_milliseconds: 0,
            cache_hit: false,
            has_error: false,
            destination_table: None,
            referenced_tables: Vec::new(),
            query_text: String::new(),
        }
    }

    /// Set processed and billed bytes.
    pub fn with_bytes(mut self, processed: u64, billed: u64) -> Self {
        self.bytes_processed = processed;
        self.bytes_billed = billed;
        self
    }

    /// Set referenced tables; duplicates keep their first position.
    pub fn with_referenced(mut self, tables: Vec<TableRef>) -> Self {
        let mut unique: Vec<TableRef> = Vec::with_capacity(tables.len());
        for table in tables {
            if !unique.contains(&table) {
                unique.push(table);
            }
        }
        self.referenced_tables = unique;
        self
    }

    /// Set the destination table.
    pub fn with_destination(mut self, table: TableRef) -> Self {
        self.destination_table = Some(table);
        self
    }

    /// Mark the record as served from cache.
    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Mark the record as failed.
    pub fn with_error(mut self, has_error: bool) -> Self {
        self.has_error = has_error;
        self
    }

    /// Set slot time in milliseconds.
    pub fn with_slot_ms(mut self, slot_ms: u64) -> Self {
        self.slot_milliseconds = slot_ms;
        self
    }

    /// Set the statement type (SELECT, MERGE, ...).
    pub fn with_statement_type(mut self, statement_type: impl Into<String>) -> Self {
        self.statement_type = statement_type.into();
        self
    }

    /// Set the query text.
    pub fn with_query(mut self, text: impl Into<String>) -> Self {
        self.query_text = text.into();
        self
    }

    /// UTC calendar date of the record.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Share of one record's bytes credited to one referenced table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAttribution {
    pub table_key: String,
    pub dataset_key: String,
    pub bytes_processed_share: f64,
    pub bytes_billed_share: f64,
    pub is_rebuild: bool,
}

/// Inclusive range of UTC dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at (and including) `as_of`.
    ///
    /// `None` when the start would fall before the earliest representable date.
    pub fn trailing(as_of: NaiveDate, days: u32) -> Option<Self> {
        let span = i64::from(days.max(1)) - 1;
        let start = as_of.checked_sub_signed(Duration::days(span))?;
        Some(Self { start, end: as_of })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Grouping key shared by every per-actor-day rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SummaryKey {
    pub date: NaiveDate,
    pub project_id: String,
    pub actor: ActorIdentity,
}

impl SummaryKey {
    pub fn for_record(record: &RawQueryRecord) -> Self {
        Self {
            date: record.date(),
            project_id: record.project_id.clone(),
            actor: record.actor.clone(),
        }
    }
}

/// Dataset line of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetCost {
    pub dataset_key: String,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cost_usd: f64,
    pub rebuild_count: u64,
}

/// Table line of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCost {
    pub table_key: String,
    pub dataset_key: String,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cost_usd: f64,
    /// True if any share credited to this table came from a rebuild
    pub is_rebuild: bool,
    pub rebuild_cost_usd: f64,
    pub incremental_cost_usd: f64,
    pub rebuild_count: u64,
}

/// Queries and cost in one UTC hour of day (0-23).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub hour_of_day: u32,
    pub query_count: u64,
    pub cost_usd: f64,
}

/// Queries and cost on one day of week (1 = Sunday ... 7 = Saturday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayBucket {
    pub day_of_week: u32,
    pub query_count: u64,
    pub cost_usd: f64,
}

/// One query as listed under `recent_queries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub statement_type: String,
    pub priority: String,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cost_usd: f64,
    pub slot_hours: f64,
    pub cache_hit: bool,
    pub has_error: bool,
    pub destination_table: Option<String>,
    pub referenced_tables: Vec<String>,
    pub query_text: String,
}

/// Per (date, project, actor) output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyActorSummary {
    pub date: NaiveDate,
    pub project_id: String,
    pub actor: String,
    pub is_service_account: bool,
    pub query_count: u64,
    pub cache_hit_count: u64,
    pub error_count: u64,
    pub total_bytes_processed: u64,
    pub total_bytes_billed: u64,
    pub estimated_cost_usd: f64,
    pub slot_hours: f64,
    pub cache_hit_percentage: f64,
    pub dataset_costs: Vec<DatasetCost>,
    pub table_costs: Vec<TableCost>,
    pub hourly_breakdown: Vec<HourlyBucket>,
    pub weekday_breakdown: Vec<WeekdayBucket>,
    pub recent_queries: Vec<QuerySummary>,
}

/// Actor line of a dataset summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorCost {
    pub actor: String,
    pub is_service_account: bool,
    pub query_count: u64,
    pub cost_usd: f64,
}

/// Per (date, project, dataset) output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDailySummary {
    pub date: NaiveDate,
    pub project_id: String,
    pub dataset_key: String,
    /// Distinct records that touched the dataset
    pub query_count: u64,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cost_usd: f64,
    pub rebuild_count: u64,
    pub top_actors: Vec<ActorCost>,
    pub top_tables: Vec<TableCost>,
}

/// Per (project, actor) activity pattern across the whole window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub project_id: String,
    pub actor: String,
    pub is_service_account: bool,
    pub query_count: u64,
    pub estimated_cost_usd: f64,
    pub active_days: u64,
    pub hourly_breakdown: Vec<HourlyBucket>,
    pub weekday_breakdown: Vec<WeekdayBucket>,
}

/// Run metadata handed back alongside the summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub window: DateRange,
    pub records_read: u64,
    pub records_skipped: u64,
    pub records_outside_window: u64,
    pub records_aggregated: u64,
    pub summaries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_one_tebibyte_costs_list_price() {
        let pricing = Pricing::new(5.0);
        assert_eq!(pricing.cost_usd(BYTES_PER_TERABYTE), 5.0);
        assert_eq!(pricing.cost_usd(BYTES_PER_TERABYTE / 2.0), 2.5);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(13.636_363), 13.64);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_table_keys() {
        let table = TableRef::new("proj", "sales", "orders");
        assert_eq!(table.table_key(), "proj.sales.orders");
        assert_eq!(table.dataset_key(), "proj.sales");
        assert!(table.same_dataset_table(&TableRef::new("other", "sales", "orders")));
    }

    #[test]
    fn test_trailing_window() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 30).unwrap();
        let window = DateRange::trailing(as_of, 30).unwrap();
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert!(window.contains(as_of));
        assert!(window.contains(window.start));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
    }

    #[test]
    fn test_trailing_window_out_of_range() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 30).unwrap();
        assert!(DateRange::trailing(as_of, u32::MAX).is_none());
        assert!(DateRange::trailing(NaiveDate::MIN, 2).is_none());
        assert_eq!(DateRange::trailing(NaiveDate::MIN, 1).map(|w| w.start), Some(NaiveDate::MIN));
    }

    #[test]
    fn test_referenced_tables_deduplicated_in_order() {
        let actor = ActorIdentity {
            canonical_key: "a@example.com".into(),
            kind: ActorKind::User,
        };
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let a = TableRef::new("p", "d", "a");
        let b = TableRef::new("p", "d", "b");
        let record = RawQueryRecord::new("j", ts, "p", actor)
            .with_referenced(vec![b.clone(), a.clone(), b.clone()]);
        assert_eq!(record.referenced_tables, vec![b, a]);
    }
}
