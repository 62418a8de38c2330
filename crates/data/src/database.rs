use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::FEATURE_COLUMNS;

/// Durable table holding the append-only feature history.
pub const FEATURE_TABLE: &str = "stock_features";

/// Unique index enforcing one row per (symbol, timestamp).
pub const FEATURE_UNIQUE_INDEX: &str = "idx_stock_features_symbol_timestamp";

const CREATE_FEATURE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS stock_features (
    id BIGSERIAL PRIMARY KEY,
    symbol TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    open DOUBLE PRECISION NOT NULL,
    high DOUBLE PRECISION NOT NULL,
    low DOUBLE PRECISION NOT NULL,
    close DOUBLE PRECISION NOT NULL,
    volume BIGINT NOT NULL,
    open_1 DOUBLE PRECISION,
    high_1 DOUBLE PRECISION,
    low_1 DOUBLE PRECISION,
    close_1 DOUBLE PRECISION,
    volume_1 BIGINT,
    avg_price_5 DOUBLE PRECISION,
    avg_price_30 DOUBLE PRECISION,
    avg_price_365 DOUBLE PRECISION,
    ratio_avg_price_5_30 DOUBLE PRECISION,
    ratio_avg_price_5_365 DOUBLE PRECISION,
    ratio_avg_price_30_365 DOUBLE PRECISION,
    avg_volume_5 DOUBLE PRECISION,
    avg_volume_30 DOUBLE PRECISION,
    avg_volume_365 DOUBLE PRECISION,
    ratio_avg_volume_5_30 DOUBLE PRECISION,
    ratio_avg_volume_5_365 DOUBLE PRECISION,
    ratio_avg_volume_30_365 DOUBLE PRECISION,
    std_price_5 DOUBLE PRECISION,
    std_price_30 DOUBLE PRECISION,
    std_price_365 DOUBLE PRECISION,
    ratio_std_price_5_30 DOUBLE PRECISION,
    ratio_std_price_5_365 DOUBLE PRECISION,
    ratio_std_price_30_365 DOUBLE PRECISION,
    std_volume_5 DOUBLE PRECISION,
    std_volume_30 DOUBLE PRECISION,
    std_volume_365 DOUBLE PRECISION,
    ratio_std_volume_5_30 DOUBLE PRECISION,
    ratio_std_volume_5_365 DOUBLE PRECISION,
    ratio_std_volume_30_365 DOUBLE PRECISION,
    return_1 DOUBLE PRECISION,
    return_5 DOUBLE PRECISION,
    return_30 DOUBLE PRECISION,
    return_365 DOUBLE PRECISION,
    moving_avg_5 DOUBLE PRECISION,
    moving_avg_30 DOUBLE PRECISION,
    moving_avg_365 DOUBLE PRECISION
)
";

const CREATE_FEATURE_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_stock_features_symbol_timestamp
    ON stock_features (symbol, timestamp)
";

pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    /// Creates a new database client connected to the specified `PostgreSQL` database.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a handle to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Creates the feature table and its unique index if they do not exist.
    ///
    /// # Errors
    /// Returns an error if either DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(CREATE_FEATURE_TABLE)
            .execute(&mut *tx)
            .await
            .context("Failed to create feature table")?;
        sqlx::query(CREATE_FEATURE_INDEX)
            .execute(&mut *tx)
            .await
            .context("Failed to create feature index")?;

        tx.commit().await?;
        tracing::info!(table = FEATURE_TABLE, "Feature schema ready");
        Ok(())
    }

    /// Closes every pooled connection. Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::info!("Closed PostgreSQL connection pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_declares_every_feature_column() {
        for column in FEATURE_COLUMNS {
            let declared = CREATE_FEATURE_TABLE
                .lines()
                .any(|line| line.trim_start().starts_with(&format!("{column} ")));
            assert!(declared, "column {column} missing from DDL");
        }
    }

    #[test]
    fn ddl_uses_named_table_and_index() {
        assert!(CREATE_FEATURE_TABLE.contains(FEATURE_TABLE));
        assert!(CREATE_FEATURE_INDEX.contains(FEATURE_UNIQUE_INDEX));
        assert!(CREATE_FEATURE_INDEX.contains("UNIQUE"));
        assert!(CREATE_FEATURE_INDEX.contains("(symbol, timestamp)"));
    }

    #[test]
    fn raw_columns_are_not_nullable() {
        for column in ["symbol", "timestamp", "open", "high", "low", "close", "volume"] {
            let line = CREATE_FEATURE_TABLE
                .lines()
                .find(|line| line.trim_start().starts_with(&format!("{column} ")))
                .unwrap();
            assert!(line.contains("NOT NULL"), "{column} should be NOT NULL");
        }
    }
}
