//! # bqspend-engine
//!
//! Cost attribution for BigQuery job history.
//!
//! This crate provides:
//! - [`Pipeline`] - Validate, attribute and aggregate one history window
//! - [`JsonLinesSource`] / [`MemorySource`] - Record sources behind [`RecordSource`]
//! - [`JsonDirSink`] / [`SqliteSink`] - Persist run output behind [`SummarySink`]
//! - [`pool::run_projects`] - Bounded concurrency across projects
//!
//! ## Example
//!
//! ```no_run
//! use bqspend_config::EngineConfig;
//! use bqspend_engine::{JsonDirSink, JsonLinesSource, Pipeline, SummarySink};
//!
//! fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(EngineConfig::default())?;
//!     let source = JsonLinesSource::new("exports/analytics-prod.jsonl");
//!     let as_of = chrono::Utc::now().date_naive();
//!
//!     let output = pipeline.run(&source, as_of)?;
//!     JsonDirSink::new("out").write("analytics-prod", &output)?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod assembler;
pub mod attribution;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod rollup;
pub mod sink;
pub mod source;

// Re-export main types
pub use error::{EngineError, RecordError, Result, SourceError};
pub use identity::{ServiceAccountRules, UNKNOWN_ACTOR};
pub use ingest::{Ingestor, RecordInput};
pub use models::{
    ActorIdentity, ActorKind, ActorProfile, DailyActorSummary, DatasetCost, DatasetDailySummary,
    DateRange, Pricing, QuerySummary, RawQueryRecord, RunReport, TableAttribution, TableCost,
    TableRef,
};
pub use pipeline::{Pipeline, RunOutput};
pub use pool::ProjectOutcome;
pub use sink::{JsonDirSink, SqliteSink, SummarySink};
pub use source::{JsonLinesSource, MemorySource, RecordSource};
