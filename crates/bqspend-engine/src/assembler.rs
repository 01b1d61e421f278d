//! Merge per-dimension rollups onto summary records.
//!
//! Rollups are keyed by [`SummaryKey`]. Any rollup missing for a key becomes
//! an empty list, so consumers never see absent fields.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::aggregator::ActorDayTotals;
use crate::models::{
    ActorCost, DailyActorSummary, DatasetCost, DatasetDailySummary, HourlyBucket, Pricing,
    QuerySummary, SummaryKey, TableCost, WeekdayBucket, round2,
};

/// Merge actor-day totals with their rollups, in key order.
pub fn assemble(
    daily_totals: BTreeMap<SummaryKey, ActorDayTotals>,
    mut dataset_rollups: HashMap<SummaryKey, Vec<DatasetCost>>,
    mut table_rollups: HashMap<SummaryKey, Vec<TableCost>>,
    mut hourly_rollups: HashMap<SummaryKey, Vec<HourlyBucket>>,
    mut weekday_rollups: HashMap<SummaryKey, Vec<WeekdayBucket>>,
    mut recent_queries: HashMap<SummaryKey, Vec<QuerySummary>>,
    pricing: Pricing,
) -> Vec<DailyActorSummary> {
    daily_totals
        .into_iter()
        .map(|(key, totals)| DailyActorSummary {
            dataset_costs: dataset_rollups.remove(&key).unwrap_or_default(),
            table_costs: table_rollups.remove(&key).unwrap_or_default(),
            hourly_breakdown: hourly_rollups.remove(&key).unwrap_or_default(),
            weekday_breakdown: weekday_rollups.remove(&key).unwrap_or_default(),
            recent_queries: recent_queries.remove(&key).unwrap_or_default(),
            query_count: totals.cache.query_count,
            cache_hit_count: totals.cache.cache_hit_count,
            error_count: totals.error_count,
            total_bytes_processed: totals.bytes_processed,
            total_bytes_billed: totals.bytes_billed,
            estimated_cost_usd: round2(pricing.cost_usd(totals.bytes_billed as f64)),
            slot_hours: round2(totals.slot_hours()),
            cache_hit_percentage: round2(totals.cache.percentage()),
            is_service_account: key.actor.is_service_account(),
            date: key.date,
            project_id: key.project_id,
            actor: key.actor.canonical_key,
        })
        .collect()
}

/// Rollups for one (date, project, dataset).
#[derive(Debug, Clone)]
pub struct DatasetDayRollup {
    pub date: NaiveDate,
    pub project_id: String,
    pub dataset_key: String,
    pub query_count: u64,
    /// Dataset totals; `None` defaults to zero
    pub dataset: Option<DatasetCost>,
    pub top_actors: Vec<ActorCost>,
    pub top_tables: Vec<TableCost>,
}

/// Turn dataset-day rollups into summaries, preserving order.
pub fn assemble_dataset_days(rollups: Vec<DatasetDayRollup>) -> Vec<DatasetDailySummary> {
    rollups
        .into_iter()
        .map(|r| {
            let totals = r.dataset.unwrap_or(DatasetCost {
                dataset_key: r.dataset_key.clone(),
                bytes_processed: 0,
                bytes_billed: 0,
                cost_usd: 0.0,
                rebuild_count: 0,
            });
            DatasetDailySummary {
                date: r.date,
                project_id: r.project_id,
                dataset_key: r.dataset_key,
                query_count: r.query_count,
                bytes_processed: totals.bytes_processed,
                bytes_billed: totals.bytes_billed,
                cost_usd: totals.cost_usd,
                rebuild_count: totals.rebuild_count,
                top_actors: r.top_actors,
                top_tables: r.top_tables,
            }
        })
        .collect()
}
