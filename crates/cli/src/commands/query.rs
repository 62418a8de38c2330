//! Read-only query commands. Output is JSON on stdout.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use tick_features_core::AppConfig;
use tick_features_data::{parse_timestamp, FeatureVector};
use tick_features_engine::{FeatureQueryService, DEFAULT_HISTORY_LIMIT};

use super::{build_store, print_json};

/// Arguments for the latest command.
#[derive(Args, Debug, Clone)]
pub struct LatestArgs {
    /// Symbol to look up (e.g., "AAPL")
    pub symbol: String,

    /// Also list up to this many recent timestamps from the recency index
    #[arg(long, default_value_t = 0)]
    pub recent: usize,
}

/// Arguments for the history command.
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    pub symbol: String,

    /// Inclusive lower bound (ISO 8601)
    #[arg(long)]
    pub start: Option<String>,

    /// Inclusive upper bound (ISO 8601)
    #[arg(long)]
    pub end: Option<String>,

    /// Maximum rows returned
    #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,
}

/// Arguments for the symbols command.
#[derive(Args, Debug, Clone)]
pub struct SymbolsArgs {}

/// Arguments for the stats command.
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    pub symbol: String,
}

#[derive(Serialize)]
struct LatestOutput<'a> {
    symbol: &'a str,
    features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    recent_timestamps: Vec<DateTime<Utc>>,
}

async fn service(config: &AppConfig) -> FeatureQueryService {
    FeatureQueryService::new(build_store(config, false).await)
}

fn parse_bound(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_timestamp(value).with_context(|| format!("Invalid --{name} time: {value}")))
        .transpose()
}

/// # Errors
/// Returns an error if the output cannot be serialized.
pub async fn run_latest(config: &AppConfig, args: LatestArgs) -> Result<()> {
    let service = service(config).await;
    let features = service.latest_features(&args.symbol).await;
    let recent_timestamps = service.recent_timestamps(&args.symbol, args.recent).await;
    service.close().await;

    print_json(&LatestOutput {
        symbol: &args.symbol,
        features,
        recent_timestamps,
    })
}

/// # Errors
/// Returns an error if a time bound cannot be parsed.
pub async fn run_history(config: &AppConfig, args: HistoryArgs) -> Result<()> {
    let start = parse_bound(args.start.as_deref(), "start")?;
    let end = parse_bound(args.end.as_deref(), "end")?;

    let service = service(config).await;
    let rows = service
        .historical_features(&args.symbol, start, end, args.limit)
        .await;
    service.close().await;

    tracing::info!(symbol = %args.symbol, rows = rows.len(), "Fetched history");
    print_json(&rows)
}

/// # Errors
/// Returns an error if the output cannot be serialized.
pub async fn run_symbols(config: &AppConfig, _args: SymbolsArgs) -> Result<()> {
    let service = service(config).await;
    let symbols = service.available_symbols().await;
    service.close().await;

    print_json(&symbols)
}

/// # Errors
/// Returns an error if the output cannot be serialized.
pub async fn run_stats(config: &AppConfig, args: StatsArgs) -> Result<()> {
    let service = service(config).await;
    let stats = service.feature_stats(&args.symbol).await;
    service.close().await;

    print_json(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_accept_rfc3339_and_naive() {
        let start = parse_bound(Some("2024-01-02T09:30:00Z"), "start").unwrap();
        let naive = parse_bound(Some("2024-01-02 09:30:00"), "start").unwrap();
        assert_eq!(start, naive);
        assert!(parse_bound(None, "end").unwrap().is_none());
    }

    #[test]
    fn bad_bound_names_the_flag() {
        let err = parse_bound(Some("yesterday"), "end").unwrap_err();
        assert!(err.to_string().contains("--end"));
    }
}
