//! Pipeline driver: source -> ingest -> attribute -> aggregate -> assemble.
//!
//! A run is all-or-nothing. Malformed records are skipped and counted in the
//! [`RunReport`]; any source or stage failure returns an error and no output.

use bqspend_config::EngineConfig;
use bqspend_core::log_run_event;
use bqspend_core::recovery::RetryConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator;
use crate::attribution::attribute_all;
use crate::error::{EngineError, Result};
use crate::identity::ServiceAccountRules;
use crate::ingest::{Ingestor, SourceItem};
use crate::models::{ActorProfile, DailyActorSummary, DatasetDailySummary, DateRange, RawQueryRecord, RunReport};
use crate::source::{RecordSource, fetch_with_retry};

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub summaries: Vec<DailyActorSummary>,
    pub dataset_summaries: Vec<DatasetDailySummary>,
    pub actor_profiles: Vec<ActorProfile>,
    pub report: RunReport,
}

/// Configured aggregation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EngineConfig,
    ingestor: Ingestor,
    retry: RetryConfig,
}

impl Pipeline {
    /// Validate `config` and build a pipeline. Fails before touching any data.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let ingestor = Ingestor::new(ServiceAccountRules::from_config(&config), config.max_query_text_chars);
        Ok(Self {
            config,
            ingestor,
            retry: RetryConfig::for_source(),
        })
    }

    /// Override the retry policy used around [`RecordSource::fetch`].
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The window a run with this `as_of` date covers.
    pub fn window(&self, as_of: NaiveDate) -> Result<DateRange> {
        let days = self.config.history_window_days;
        DateRange::trailing(as_of, days).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "a {days}-day window ending {as_of} starts before the earliest supported date"
            ))
        })
    }

    /// Fetch from `source` and aggregate the window ending at `as_of`.
    pub fn run(&self, source: &dyn RecordSource, as_of: NaiveDate) -> Result<RunOutput> {
        log_run_event!(source.name(), "fetch_started");
        let items = fetch_with_retry(source, self.retry.clone())?;
        let output = self.run_items(items, as_of)?;
        log_run_event!(
            source.name(),
            "run_completed",
            records_read = output.report.records_read,
            records_skipped = output.report.records_skipped,
            summaries = output.report.summaries
        );
        Ok(output)
    }

    /// Aggregate already-fetched source items.
    pub fn run_items(&self, items: Vec<SourceItem>, as_of: NaiveDate) -> Result<RunOutput> {
        let records_read = items.len() as u64;
        let ingested = self.ingestor.ingest_all(items);
        let mut output = self.run_records(ingested.records, as_of)?;
        output.report.records_read = records_read;
        output.report.records_skipped = ingested.skipped;
        Ok(output)
    }

    /// Aggregate validated records.
    pub fn run_records(&self, records: Vec<RawQueryRecord>, as_of: NaiveDate) -> Result<RunOutput> {
        let window = self.window(as_of)?;
        let total = records.len() as u64;
        let records: Vec<RawQueryRecord> = records
            .into_iter()
            .filter(|r| window.contains(r.date()))
            .collect();
        let outside = total - records.len() as u64;
        if outside > 0 {
            debug!(outside, start = %window.start, end = %window.end, "Dropped records outside window");
        }

        let attributions = attribute_all(&records);
        let summaries = aggregator::aggregate(&records, &attributions, window, &self.config)?;
        let dataset_summaries = aggregator::aggregate_datasets(&records, &attributions, window, &self.config)?;
        let actor_profiles = aggregator::actor_profiles(&records, window, &self.config);

        let report = RunReport {
            window,
            records_read: total,
            records_skipped: 0,
            records_outside_window: outside,
            records_aggregated: records.len() as u64,
            summaries: summaries.len() as u64,
        };
        info!(
            start = %window.start,
            end = %window.end,
            records = report.records_aggregated,
            summaries = report.summaries,
            datasets = dataset_summaries.len(),
            "Aggregation finished"
        );

        Ok(RunOutput {
            summaries,
            dataset_summaries,
            actor_profiles,
            report,
        })
    }
}
