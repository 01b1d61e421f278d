//! Bounded worker pool running one pipeline per project.
//!
//! Each project gets its own `Result`; a failing or panicking project never
//! cancels the others. Pipelines are synchronous and run on tokio's blocking
//! pool, gated by a semaphore sized to the configured worker count.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::RawQueryRecord;
use crate::pipeline::{Pipeline, RunOutput};
use crate::source::RecordSource;

/// Result of one project's run.
#[derive(Debug)]
pub struct ProjectOutcome {
    pub name: String,
    pub result: Result<RunOutput>,
}

impl ProjectOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

async fn run_jobs<F>(jobs: Vec<(String, F)>, workers: usize) -> Vec<ProjectOutcome>
where
    F: FnOnce() -> Result<RunOutput> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let names: Vec<String> = jobs.iter().map(|(name, _)| name.clone()).collect();
    let mut set = JoinSet::new();

    for (index, (name, job)) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    debug!(project = %name, "Worker started");
                    match tokio::task::spawn_blocking(job).await {
                        Ok(result) => result,
                        Err(e) => Err(EngineError::Worker(format!("{name}: {e}"))),
                    }
                }
                Err(_) => Err(EngineError::Worker("worker pool closed".to_string())),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<RunOutput>>> = names.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => warn!(error = %e, "Worker task failed to join"),
        }
    }

    names
        .into_iter()
        .zip(results)
        .map(|(name, result)| {
            let result = result.unwrap_or_else(|| Err(EngineError::Worker(format!("{name}: task did not finish"))));
            match &result {
                Ok(output) => info!(project = %name, summaries = output.report.summaries, "Project finished"),
                Err(e) => warn!(project = %name, error = %e, "Project failed"),
            }
            ProjectOutcome { name, result }
        })
        .collect()
}

/// Run `pipeline` over every source with at most `workers` at a time.
///
/// Outcomes come back in the order of `sources`.
pub async fn run_projects(
    pipeline: Arc<Pipeline>,
    sources: Vec<Arc<dyn RecordSource>>,
    as_of: NaiveDate,
    workers: usize,
) -> Vec<ProjectOutcome> {
    let jobs: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let pipeline = Arc::clone(&pipeline);
            let name = source.name().to_string();
            (name, move || pipeline.run(source.as_ref(), as_of))
        })
        .collect();
    run_jobs(jobs, workers).await
}

/// Split records by project, preserving input order within each project.
pub fn partition_by_project(records: Vec<RawQueryRecord>) -> BTreeMap<String, Vec<RawQueryRecord>> {
    let mut partitions: BTreeMap<String, Vec<RawQueryRecord>> = BTreeMap::new();
    for record in records {
        partitions.entry(record.project_id.clone()).or_default().push(record);
    }
    partitions
}

/// Run `pipeline` over already-partitioned records, one job per project.
pub async fn run_partitions(
    pipeline: Arc<Pipeline>,
    partitions: BTreeMap<String, Vec<RawQueryRecord>>,
    as_of: NaiveDate,
    workers: usize,
) -> Vec<ProjectOutcome> {
    let jobs: Vec<_> = partitions
        .into_iter()
        .map(|(project, records)| {
            let pipeline = Arc::clone(&pipeline);
            (project, move || pipeline.run_records(records, as_of))
        })
        .collect();
    run_jobs(jobs, workers).await
}
