//! CLI commands for the tick feature store.

pub mod ingest;
pub mod init_db;
pub mod query;

use std::sync::Arc;

use anyhow::Result;
use tick_features_core::{AppConfig, ConfigLoader};
use tick_features_engine::{
    connect_backends, ColdStore, HotStore, HybridFeatureStore, MemoryColdStore, MemoryHotStore,
    StoreSettings,
};

pub use ingest::{run_consume, run_replay_csv, ConsumeArgs, ReplayCsvArgs};
pub use init_db::{run_init_db, InitDbArgs};
pub use query::{
    run_history, run_latest, run_stats, run_symbols, HistoryArgs, LatestArgs, StatsArgs,
    SymbolsArgs,
};

/// Loads layered configuration from `path`.
///
/// # Errors
/// Returns an error if the configuration cannot be parsed or is invalid.
pub fn load_config(path: &str) -> Result<AppConfig> {
    ConfigLoader::load_from(path)
}

/// Connects the configured backends, or in-process stores when `in_memory`.
pub async fn build_store(config: &AppConfig, in_memory: bool) -> Arc<HybridFeatureStore> {
    if in_memory {
        tracing::info!("Using in-memory feature stores");
        return Arc::new(HybridFeatureStore::new(
            Some(Arc::new(MemoryHotStore::new()) as Arc<dyn HotStore>),
            Some(Arc::new(MemoryColdStore::new()) as Arc<dyn ColdStore>),
            StoreSettings::from_config(&config.processor),
        ));
    }
    Arc::new(connect_backends(config).await)
}

/// Resolves once Ctrl+C is received. If the signal handler cannot be
/// installed the future never resolves.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Prints `value` as pretty JSON on stdout.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
