//! bqspend - BigQuery cost attribution
//!
//! Turns BigQuery job-history exports into per actor-day spend summaries.
//!
//! ## Usage
//!
//! ```bash
//! # Aggregate the last 30 days of two project exports
//! bqspend run --input exports/analytics.jsonl --input exports/etl.jsonl --output out/
//!
//! # Pin the window end and also write to SQLite
//! bqspend run --input exports/ --output out/ --sqlite out/spend.db --as-of 2026-03-31
//!
//! # Validate a config file
//! bqspend check-config --config bqspend.yaml
//!
//! # With verbose logging
//! bqspend -v run --input exports/ --output out/
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use bqspend_config::EngineConfig;
use bqspend_core::{LogGuard, init_logging, log_run_event};
use bqspend_engine::pool::run_projects;
use bqspend_engine::{JsonDirSink, JsonLinesSource, Pipeline, RecordSource, SqliteSink, SummarySink};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};

/// BigQuery cost attribution
///
/// Splits each job's billed bytes across the tables it read and rolls the
/// result up per UTC day, project and actor.
#[derive(Parser, Debug)]
#[command(name = "bqspend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.bqspend/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate one or more job exports
    Run(RunArgs),

    /// Load and validate a config file
    CheckConfig {
        /// YAML config file
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON-lines export, or a directory of `*.jsonl` exports (repeatable)
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory receiving the JSON summaries
    #[arg(long)]
    output: PathBuf,

    /// Also write summaries to this SQLite database
    #[arg(long)]
    sqlite: Option<PathBuf>,

    /// Last day of the window, YYYY-MM-DD (defaults to today, UTC)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// YAML config file (defaults to $BQSPEND_CONFIG, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the price per TiB billed
    #[arg(long)]
    cost_per_terabyte: Option<f64>,

    /// Override the window length in days
    #[arg(long)]
    window_days: Option<u32>,

    /// Override the number of concurrent project pipelines
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            if let Some(hint) = e.guidance() {
                eprintln!("Hint: {}", hint);
            }
            return ExitCode::from(1);
        }
    };

    let outcome = match cli.command {
        Command::Run(args) => run(args),
        Command::CheckConfig { config } => check_config(&config).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("bqspend error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> bqspend_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

fn load_config(args: &RunArgs) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(args.config.as_deref()).context("failed to load config")?;
    if let Some(cost) = args.cost_per_terabyte {
        config = config.with_cost_per_terabyte(cost);
    }
    if let Some(days) = args.window_days {
        config = config.with_history_window_days(days);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

/// Expand directories into their `*.jsonl` files.
fn collect_sources(inputs: &[PathBuf]) -> anyhow::Result<Vec<Arc<dyn RecordSource>>> {
    let mut sources: Vec<Arc<dyn RecordSource>> = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = JsonLinesSource::from_directory(input)
                .with_context(|| format!("failed to list {}", input.display()))?;
            if found.is_empty() {
                bail!("no .jsonl exports in {}", input.display());
            }
            for source in found {
                debug!(source = source.name(), path = %source.path().display(), "Found export");
                sources.push(Arc::new(source));
            }
        } else {
            sources.push(Arc::new(JsonLinesSource::new(input)));
        }
    }
    Ok(sources)
}

/// Returns `Ok(false)` when at least one project failed.
fn run(args: RunArgs) -> anyhow::Result<bool> {
    let config = load_config(&args)?;
    let pipeline = Arc::new(Pipeline::new(config).context("invalid configuration")?);
    let workers = pipeline.config().workers;
    let sources = collect_sources(&args.inputs)?;
    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let window = pipeline.window(as_of)?;

    info!(
        projects = sources.len(),
        workers,
        start = %window.start,
        end = %window.end,
        "Starting bqspend run"
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let outcomes = runtime.block_on(run_projects(pipeline, sources, as_of, workers));

    let json_sink = JsonDirSink::new(&args.output);
    let sqlite_sink = args
        .sqlite
        .as_ref()
        .map(SqliteSink::open)
        .transpose()
        .context("failed to open SQLite database")?;

    let mut failed = 0usize;
    for outcome in &outcomes {
        let output = match &outcome.result {
            Ok(output) => output,
            Err(e) => {
                failed += 1;
                eprintln!("{}: failed: {}", outcome.name, e);
                continue;
            }
        };

        let write = json_sink.write(&outcome.name, output).and_then(|n| match &sqlite_sink {
            Some(db) => db.write(&outcome.name, output),
            None => Ok(n),
        });
        if let Err(e) = write {
            failed += 1;
            error!(project = %outcome.name, error = %e, "Failed to write summaries");
            eprintln!("{}: failed to write summaries: {}", outcome.name, e);
            continue;
        }

        let report = &output.report;
        log_run_event!(
            outcome.name.as_str(),
            "summaries_written",
            records_read = report.records_read,
            records_skipped = report.records_skipped,
            records_outside_window = report.records_outside_window,
            summaries = report.summaries
        );
        println!(
            "{}: {} summaries from {} records ({} skipped, {} outside window) -> {}",
            outcome.name,
            report.summaries,
            report.records_aggregated,
            report.records_skipped,
            report.records_outside_window,
            json_sink.run_dir(&outcome.name).display()
        );
    }

    info!(projects = outcomes.len(), failed, "bqspend run finished");
    Ok(failed == 0)
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    println!(
        "{}: ok (cost_per_terabyte={}, history_window_days={}, workers={})",
        path.display(),
        config.cost_per_terabyte,
        config.history_window_days,
        config.workers
    );
    Ok(())
}
