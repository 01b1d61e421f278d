//! Time-bucketed aggregation over one history window.
//!
//! Records are grouped by (UTC date, project, actor). Each group carries
//! scalar totals plus hour-of-day and day-of-week buckets nested inside it.
//! Dataset, table and recent-query rollups are built per group by
//! [`crate::rollup`] and merged by [`crate::assembler`].
//!
//! Everything is keyed through `BTreeMap`s and sums are taken in input order,
//! so identical input always yields identical output.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bqspend_config::EngineConfig;
use chrono::{Datelike, NaiveDate, Timelike};
use tracing::debug;

use crate::assembler::{self, DatasetDayRollup};
use crate::error::{EngineError, Result};
use crate::models::{
    ActorIdentity, ActorProfile, DailyActorSummary, DatasetDailySummary, DateRange, HourlyBucket,
    Pricing, RawQueryRecord, SLOT_MS_PER_HOUR, SummaryKey, TableAttribution, WeekdayBucket, round2,
};
use crate::rollup;

/// Query and cache-hit counts with weighted percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub query_count: u64,
    pub cache_hit_count: u64,
}

impl CacheStats {
    pub fn new(query_count: u64, cache_hit_count: u64) -> Self {
        Self {
            query_count,
            cache_hit_count,
        }
    }

    /// Combine two buckets by summing counts, not by averaging percentages.
    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            query_count: self.query_count + other.query_count,
            cache_hit_count: self.cache_hit_count + other.cache_hit_count,
        }
    }

    /// `hits / queries * 100`, or 0 for an empty bucket. Unrounded.
    pub fn percentage(&self) -> f64 {
        if self.query_count == 0 {
            0.0
        } else {
            self.cache_hit_count as f64 / self.query_count as f64 * 100.0
        }
    }
}

/// Scalar totals for one actor-day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorDayTotals {
    pub cache: CacheStats,
    pub error_count: u64,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub slot_milliseconds: u64,
}

impl ActorDayTotals {
    pub fn add(&mut self, record: &RawQueryRecord) {
        self.cache = self
            .cache
            .merge(CacheStats::new(1, u64::from(record.cache_hit)));
        self.error_count += u64::from(record.has_error);
        self.bytes_processed = self.bytes_processed.saturating_add(record.bytes_processed);
        self.bytes_billed = self.bytes_billed.saturating_add(record.bytes_billed);
        self.slot_milliseconds = self.slot_milliseconds.saturating_add(record.slot_milliseconds);
    }

    pub fn slot_hours(&self) -> f64 {
        self.slot_milliseconds as f64 / SLOT_MS_PER_HOUR
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    query_count: u64,
    bytes_billed: u64,
}

/// Hour-of-day and day-of-week buckets.
#[derive(Debug, Clone, Default)]
pub struct TimeBuckets {
    hourly: BTreeMap<u32, Bucket>,
    weekday: BTreeMap<u32, Bucket>,
}

impl TimeBuckets {
    pub fn add(&mut self, record: &RawQueryRecord) {
        let hour = record.timestamp.hour();
        // BigQuery DAYOFWEEK: 1 = Sunday ... 7 = Saturday
        let day = record.timestamp.weekday().number_from_sunday();
        for bucket in [
            self.hourly.entry(hour).or_default(),
            self.weekday.entry(day).or_default(),
        ] {
            bucket.query_count += 1;
            bucket.bytes_billed = bucket.bytes_billed.saturating_add(record.bytes_billed);
        }
    }

    pub fn hourly_breakdown(&self, pricing: Pricing) -> Vec<HourlyBucket> {
        self.hourly
            .iter()
            .map(|(&hour_of_day, b)| HourlyBucket {
                hour_of_day,
                query_count: b.query_count,
                cost_usd: round2(pricing.cost_usd(b.bytes_billed as f64)),
            })
            .collect()
    }

    pub fn weekday_breakdown(&self, pricing: Pricing) -> Vec<WeekdayBucket> {
        self.weekday
            .iter()
            .map(|(&day_of_week, b)| WeekdayBucket {
                day_of_week,
                query_count: b.query_count,
                cost_usd: round2(pricing.cost_usd(b.bytes_billed as f64)),
            })
            .collect()
    }
}

fn check_parallel(records: &[RawQueryRecord], attributions: &[Vec<TableAttribution>]) -> Result<()> {
    if records.len() != attributions.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} records but {} attribution lists",
            records.len(),
            attributions.len()
        )));
    }
    Ok(())
}

/// Indices of in-window records grouped by actor-day, in input order.
fn group_by_actor_day(records: &[RawQueryRecord], window: DateRange) -> BTreeMap<SummaryKey, Vec<usize>> {
    let mut groups: BTreeMap<SummaryKey, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        if window.contains(record.date()) {
            groups.entry(SummaryKey::for_record(record)).or_default().push(idx);
        }
    }
    groups
}

/// Build one [`DailyActorSummary`] per (date, project, actor) in `window`.
///
/// `attributions[i]` must hold the attributions of `records[i]`.
pub fn aggregate(
    records: &[RawQueryRecord],
    attributions: &[Vec<TableAttribution>],
    window: DateRange,
    config: &EngineConfig,
) -> Result<Vec<DailyActorSummary>> {
    check_parallel(records, attributions)?;
    let pricing = Pricing::new(config.cost_per_terabyte);
    let groups = group_by_actor_day(records, window);

    let mut totals = BTreeMap::new();
    let mut datasets = HashMap::new();
    let mut tables = HashMap::new();
    let mut hourly = HashMap::new();
    let mut weekday = HashMap::new();
    let mut recent = HashMap::new();

    for (key, indices) in groups {
        let mut day_totals = ActorDayTotals::default();
        let mut buckets = TimeBuckets::default();
        for &idx in &indices {
            day_totals.add(&records[idx]);
            buckets.add(&records[idx]);
        }

        let attrs: Vec<&TableAttribution> = indices
            .iter()
            .flat_map(|&idx| attributions[idx].iter())
            .collect();
        datasets.insert(
            key.clone(),
            rollup::top_datasets(attrs.iter().copied(), config.top_n_datasets, pricing),
        );
        tables.insert(
            key.clone(),
            rollup::top_tables(attrs.iter().copied(), config.top_n_tables, pricing),
        );
        hourly.insert(key.clone(), buckets.hourly_breakdown(pricing));
        weekday.insert(key.clone(), buckets.weekday_breakdown(pricing));
        recent.insert(
            key.clone(),
            rollup::top_recent_queries(
                indices.iter().map(|&idx| &records[idx]),
                config.top_n_recent_queries,
                pricing,
            ),
        );
        totals.insert(key, day_totals);
    }

    let summaries = assembler::assemble(totals, datasets, tables, hourly, weekday, recent, pricing);
    debug!(summaries = summaries.len(), "Aggregated actor-day summaries");
    Ok(summaries)
}

/// Build one [`DatasetDailySummary`] per (date, project, dataset) in `window`.
pub fn aggregate_datasets(
    records: &[RawQueryRecord],
    attributions: &[Vec<TableAttribution>],
    window: DateRange,
    config: &EngineConfig,
) -> Result<Vec<DatasetDailySummary>> {
    check_parallel(records, attributions)?;
    let pricing = Pricing::new(config.cost_per_terabyte);

    type DatasetKey = (NaiveDate, String, String);
    let mut groups: BTreeMap<DatasetKey, Vec<(usize, &ActorIdentity, &TableAttribution)>> =
        BTreeMap::new();
    for (idx, (record, attrs)) in records.iter().zip(attributions).enumerate() {
        if !window.contains(record.date()) {
            continue;
        }
        for attr in attrs {
            groups
                .entry((record.date(), record.project_id.clone(), attr.dataset_key.clone()))
                .or_default()
                .push((idx, &record.actor, attr));
        }
    }

    let rollups = groups
        .into_iter()
        .map(|((date, project_id, dataset_key), entries)| {
            let query_count = entries
                .iter()
                .map(|(idx, _, _)| *idx)
                .collect::<BTreeSet<_>>()
                .len() as u64;
            let dataset = rollup::top_datasets(entries.iter().map(|(_, _, a)| *a), 1, pricing)
                .into_iter()
                .next();
            DatasetDayRollup {
                date,
                project_id,
                query_count,
                top_actors: rollup::top_actors(entries.iter().copied(), config.top_n_datasets, pricing),
                top_tables: rollup::top_tables(entries.iter().map(|(_, _, a)| *a), config.top_n_tables, pricing),
                dataset,
                dataset_key,
            }
        })
        .collect();

    Ok(assembler::assemble_dataset_days(rollups))
}

/// Build one [`ActorProfile`] per (project, actor) across all of `window`.
pub fn actor_profiles(records: &[RawQueryRecord], window: DateRange, config: &EngineConfig) -> Vec<ActorProfile> {
    let pricing = Pricing::new(config.cost_per_terabyte);

    #[derive(Default)]
    struct ProfileAcc {
        query_count: u64,
        bytes_billed: u64,
        days: BTreeSet<NaiveDate>,
        buckets: TimeBuckets,
    }

    let mut groups: BTreeMap<(String, ActorIdentity), ProfileAcc> = BTreeMap::new();
    for record in records.iter().filter(|r| window.contains(r.date())) {
        let acc = groups
            .entry((record.project_id.clone(), record.actor.clone()))
            .or_default();
        acc.query_count += 1;
        acc.bytes_billed = acc.bytes_billed.saturating_add(record.bytes_billed);
        acc.days.insert(record.date());
        acc.buckets.add(record);
    }

    groups
        .into_iter()
        .map(|((project_id, actor), acc)| ActorProfile {
            project_id,
            is_service_account: actor.is_service_account(),
            actor: actor.canonical_key,
            query_count: acc.query_count,
            estimated_cost_usd: round2(pricing.cost_usd(acc.bytes_billed as f64)),
            active_days: acc.days.len() as u64,
            hourly_breakdown: acc.buckets.hourly_breakdown(pricing),
            weekday_breakdown: acc.buckets.weekday_breakdown(pricing),
        })
        .collect()
}
