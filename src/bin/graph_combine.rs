//! Graph Combine Binary
//!
//! Combines a source dataset file into a new target dataset file and prints
//! the run summary as JSON.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `COMBINER_REPORT_INTERVAL`, `COMBINER_COMMIT_INTERVAL`,
//!   `COMBINER_SCAN_BATCH_SIZE`, `COMBINER_TARGET_ROOT_LABEL`: override the config file
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! Without `--config` the physical-models classification rules are used.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin graph_combine --features cli -- source.json target.json [--config combiner.json] [--replace]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use graph_combiner::{combine, ClassificationRules, CombinerConfig};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graph_combine=info,graph_combiner=info".into());

    if log_format == "pretty" {
        // Pretty format for local development
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
            )
            .init();
    }
}

/// Combine a source dataset file into a new target dataset file.
#[derive(Debug, Parser)]
#[command(name = "graph_combine", version, about, long_about = None)]
struct Args {
    /// Source dataset (JSON)
    source: PathBuf,

    /// Target dataset to create (JSON)
    target: PathBuf,

    /// Combiner configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Remove an existing target before combining
    #[arg(long)]
    replace: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let config = match &args.config {
        Some(path) => match CombinerConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => CombinerConfig::default().with_rules(ClassificationRules::physical_models()),
    }
    .with_env_overrides();

    if args.replace && args.target.exists() {
        info!(target_path = %args.target.display(), "Removing existing target");
        if let Err(e) = std::fs::remove_file(&args.target) {
            error!(error = %e, "Failed to remove existing target");
            return ExitCode::FAILURE;
        }
    }

    match combine(&args.source, &args.target, config).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "Failed to render summary"),
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                phase = %failure.phase,
                processed = failure.processed,
                error = %failure.error,
                "Combine failed; target keeps its last commit"
            );
            ExitCode::FAILURE
        }
    }
}
