//! Schema bootstrap command.

use anyhow::Result;
use clap::Args;
use tick_features_core::AppConfig;
use tick_features_data::{DatabaseClient, FEATURE_TABLE, FEATURE_UNIQUE_INDEX};

/// Arguments for the init-db command.
#[derive(Args, Debug, Clone)]
pub struct InitDbArgs {
    /// Database connection URL (overrides the configured one)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Creates the feature table and unique index if missing.
///
/// # Errors
/// Returns an error if the database is unreachable or the DDL fails.
pub async fn run_init_db(config: &AppConfig, args: InitDbArgs) -> Result<()> {
    let url = args.db_url.unwrap_or_else(|| config.database.url.clone());

    let client = DatabaseClient::new(
        &url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await?;
    client.ensure_schema().await?;
    client.close().await;

    println!("Schema ready: table {FEATURE_TABLE}, index {FEATURE_UNIQUE_INDEX}");
    Ok(())
}
