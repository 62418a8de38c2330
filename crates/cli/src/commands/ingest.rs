//! Ingestion commands: live JSON consumption and CSV replay.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

use tick_features_core::AppConfig;
use tick_features_data::models::WireVolume;
use tick_features_data::{RawTick, TickMessage};
use tick_features_engine::{IngestPipeline, ProcessorRegistry, ProcessorSettings};

use super::{build_store, print_json, shutdown_signal};

/// Arguments for the consume command.
#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    /// File of newline-delimited JSON ticks (reads stdin when omitted)
    #[arg(short, long)]
    pub input: Option<String>,

    /// Use in-process stores instead of Redis and PostgreSQL
    #[arg(long)]
    pub in_memory: bool,
}

/// Arguments for the replay-csv command.
#[derive(Args, Debug, Clone)]
pub struct ReplayCsvArgs {
    /// CSV file with timestamp,open,high,low,close,volume columns
    pub path: String,

    /// Symbol the bars belong to
    #[arg(short, long)]
    pub symbol: String,

    /// Use in-process stores instead of Redis and PostgreSQL
    #[arg(long)]
    pub in_memory: bool,
}

/// One CSV bar. Fields are optional so a bad row is reported, not fatal.
#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: Option<String>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<WireVolume>,
}

impl CsvBar {
    fn into_message(self, symbol: &str) -> TickMessage {
        TickMessage {
            symbol: Some(symbol.to_string()),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

async fn build_pipeline(config: &AppConfig, in_memory: bool) -> Result<IngestPipeline> {
    let store = build_store(config, in_memory).await;
    let registry = ProcessorRegistry::new(store, ProcessorSettings::from_config(&config.processor))?;
    Ok(IngestPipeline::new(
        Arc::new(registry),
        config.ingest.feature_refresh_every,
    ))
}

/// Consumes JSON ticks until end of input or Ctrl+C, then prints a summary.
///
/// # Errors
/// Returns an error if the input cannot be opened or read.
pub async fn run_consume(config: &AppConfig, args: ConsumeArgs) -> Result<()> {
    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open tick file: {path}"))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let pipeline = build_pipeline(config, args.in_memory).await?;
    info!(source = args.input.as_deref().unwrap_or("stdin"), "Consuming ticks");

    let summary = pipeline.run(input, shutdown_signal()).await?;
    print_json(&summary)
}

/// Reads every bar from a CSV file, in file order.
fn read_bars(path: &Path, symbol: &str) -> Result<(Vec<RawTick>, u64)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let mut ticks = Vec::new();
    let mut malformed = 0u64;
    for (line, record) in reader.deserialize::<CsvBar>().enumerate() {
        let parsed = record
            .map_err(|e| e.to_string())
            .and_then(|bar| RawTick::try_from(bar.into_message(symbol)).map_err(|e| e.to_string()));
        match parsed {
            Ok(tick) => ticks.push(tick),
            Err(e) => {
                malformed += 1;
                warn!(row = line + 1, error = %e, "Skipping malformed CSV row");
            }
        }
    }
    Ok((ticks, malformed))
}

async fn replay(pipeline: &mut IngestPipeline, ticks: Vec<RawTick>) {
    for tick in ticks {
        pipeline.handle_tick(tick).await;
    }
}

/// Replays a CSV file through the pipeline, then prints a summary.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn run_replay_csv(config: &AppConfig, args: ReplayCsvArgs) -> Result<()> {
    let (ticks, malformed) = read_bars(Path::new(&args.path), &args.symbol)?;
    info!(
        symbol = %args.symbol,
        bars = ticks.len(),
        malformed,
        "Replaying CSV"
    );

    let mut pipeline = build_pipeline(config, args.in_memory).await?;
    tokio::select! {
        () = replay(&mut pipeline, ticks) => {}
        () = shutdown_signal() => {}
    }

    let mut summary = pipeline.finish().await;
    summary.messages += malformed;
    summary.malformed += malformed;
    print_json(&summary)
}
