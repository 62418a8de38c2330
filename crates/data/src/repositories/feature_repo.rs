//! Feature history repository.
//!
//! Append-only access to the `stock_features` table: atomic multi-row batch
//! inserts, recency-ordered range queries, and the counts the query surface
//! reports.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;

use crate::database::FEATURE_TABLE;
use crate::models::{FeatureVector, FEATURE_COLUMNS};

/// Rows per INSERT statement. 43 binds per row keeps each statement well
/// under the Postgres limit of 65535 parameters.
const INSERT_CHUNK_SIZE: usize = 500;

/// Failure modes of a batch insert.
#[derive(Debug, Error)]
pub enum InsertError {
    /// A row collided with the (symbol, timestamp) unique index. Nothing from
    /// the batch was committed.
    #[error("duplicate (symbol, timestamp) in batch: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InsertError {
    fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            _ => Self::Database(err),
        }
    }
}

/// Repository for engineered feature rows.
#[derive(Debug, Clone)]
pub struct FeatureRepository {
    pool: PgPool,
}

impl FeatureRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a batch of feature rows inside a single transaction.
    ///
    /// Either every row is committed or none is: a unique violation anywhere
    /// in the batch rolls the whole transaction back.
    ///
    /// # Returns
    /// The number of rows inserted.
    ///
    /// # Errors
    /// Returns [`InsertError::Duplicate`] if any (symbol, timestamp) already
    /// exists, or [`InsertError::Database`] for any other failure.
    pub async fn insert_batch(&self, rows: &[FeatureVector]) -> Result<u64, InsertError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = insert_builder(chunk);
            match builder.build().execute(&mut *tx).await {
                Ok(result) => inserted += result.rows_affected(),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback after failed insert failed");
                    }
                    return Err(InsertError::classify(e));
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Returns up to `limit` rows for a symbol, newest first, optionally
    /// bounded by an inclusive time range.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn query_recent(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<FeatureVector>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {FEATURE_TABLE} WHERE symbol = ",
            FEATURE_COLUMNS.join(", ")
        ));
        builder.push_bind(symbol.to_string());
        if let Some(start) = start {
            builder.push(" AND timestamp >= ").push_bind(start);
        }
        if let Some(end) = end {
            builder.push(" AND timestamp <= ").push_bind(end);
        }
        builder
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit.max(0));

        builder
            .build_query_as::<FeatureVector>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query historical features")
    }

    /// Counts stored rows for a symbol.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn count_for_symbol(&self, symbol: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {FEATURE_TABLE} WHERE symbol = $1"
        ))
        .bind(symbol)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count feature rows")?;

        Ok(row.0)
    }

    /// Returns the newest stored timestamp for a symbol.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn latest_timestamp(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(&format!(
            "SELECT MAX(timestamp) FROM {FEATURE_TABLE} WHERE symbol = $1"
        ))
        .bind(symbol)
        .fetch_one(&self.pool)
        .await
        .context("Failed to query latest feature timestamp")?;

        Ok(row.0)
    }

    /// Lists every symbol with at least one stored row.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn distinct_symbols(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT DISTINCT symbol FROM {FEATURE_TABLE} ORDER BY symbol"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list symbols")?;

        Ok(rows.into_iter().map(|(symbol,)| symbol).collect())
    }

    /// Cheap liveness probe.
    ///
    /// # Errors
    /// Returns an error if the pool cannot serve a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("PostgreSQL ping failed")?;
        Ok(())
    }

    /// Closes the pool. Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
    }
}

fn insert_builder(rows: &[FeatureVector]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {FEATURE_TABLE} ({}) ",
        FEATURE_COLUMNS.join(", ")
    ));

    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.symbol.clone())
            .push_bind(row.timestamp)
            .push_bind(row.open)
            .push_bind(row.high)
            .push_bind(row.low)
            .push_bind(row.close)
            .push_bind(row.volume)
            .push_bind(row.open_1)
            .push_bind(row.high_1)
            .push_bind(row.low_1)
            .push_bind(row.close_1)
            .push_bind(row.volume_1)
            .push_bind(row.avg_price_5)
            .push_bind(row.avg_price_30)
            .push_bind(row.avg_price_365)
            .push_bind(row.ratio_avg_price_5_30)
            .push_bind(row.ratio_avg_price_5_365)
            .push_bind(row.ratio_avg_price_30_365)
            .push_bind(row.avg_volume_5)
            .push_bind(row.avg_volume_30)
            .push_bind(row.avg_volume_365)
            .push_bind(row.ratio_avg_volume_5_30)
            .push_bind(row.ratio_avg_volume_5_365)
            .push_bind(row.ratio_avg_volume_30_365)
            .push_bind(row.std_price_5)
            .push_bind(row.std_price_30)
            .push_bind(row.std_price_365)
            .push_bind(row.ratio_std_price_5_30)
            .push_bind(row.ratio_std_price_5_365)
            .push_bind(row.ratio_std_price_30_365)
            .push_bind(row.std_volume_5)
            .push_bind(row.std_volume_30)
            .push_bind(row.std_volume_365)
            .push_bind(row.ratio_std_volume_5_30)
            .push_bind(row.ratio_std_volume_5_365)
            .push_bind(row.ratio_std_volume_30_365)
            .push_bind(row.return_1)
            .push_bind(row.return_5)
            .push_bind(row.return_30)
            .push_bind(row.return_365)
            .push_bind(row.moving_avg_5)
            .push_bind(row.moving_avg_30)
            .push_bind(row.moving_avg_365);
    });

    builder
}
