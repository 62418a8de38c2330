//! Production backends: Redis as the hot store, Postgres as the cold store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use tick_features_core::AppConfig;
use tick_features_data::{
    DatabaseClient, FeatureRepository, FeatureVector, InsertError, RedisFeatureCache,
};

use crate::error::StoreError;
use crate::store::{ColdStore, HotStore, HybridFeatureStore, StoreSettings};

#[async_trait]
impl HotStore for RedisFeatureCache {
    async fn put_latest(
        &self,
        vector: &FeatureVector,
        ttl: Duration,
        recency_cap: usize,
    ) -> anyhow::Result<()> {
        self.store_latest(vector, ttl, recency_cap).await
    }

    async fn get_latest(&self, symbol: &str) -> anyhow::Result<Option<FeatureVector>> {
        self.latest(symbol).await
    }

    async fn recent_timestamps(
        &self,
        symbol: &str,
        count: usize,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        Self::recent_timestamps(self, symbol, count).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Self::ping(self).await
    }

    async fn close(&self) {
        Self::close(self);
    }
}

impl From<InsertError> for StoreError {
    fn from(err: InsertError) -> Self {
        match err {
            InsertError::Duplicate(detail) => Self::Duplicate(detail),
            InsertError::Database(e) => Self::Unavailable(e.into()),
        }
    }
}

#[async_trait]
impl ColdStore for FeatureRepository {
    async fn insert_batch(&self, rows: &[FeatureVector]) -> Result<u64, StoreError> {
        Ok(Self::insert_batch(self, rows).await?)
    }

    async fn query_recent(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<FeatureVector>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query_recent(self, symbol, start, end, limit).await
    }

    async fn count(&self, symbol: &str) -> anyhow::Result<u64> {
        let count = self.count_for_symbol(symbol).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn latest_timestamp(&self, symbol: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Self::latest_timestamp(self, symbol).await
    }

    async fn symbols(&self) -> anyhow::Result<Vec<String>> {
        self.distinct_symbols().await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Self::ping(self).await
    }

    async fn close(&self) {
        Self::close(self).await;
    }
}

/// Connects both backends from configuration.
///
/// A backend that cannot be reached is logged and left out; the returned
/// store then runs degraded on that side.
pub async fn connect_backends(config: &AppConfig) -> HybridFeatureStore {
    let settings = StoreSettings::from_config(&config.processor);

    let hot: Option<Arc<dyn HotStore>> =
        match RedisFeatureCache::connect(&config.redis.url, config.redis.connect_timeout()).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, running without hot store");
                None
            }
        };

    let cold: Option<Arc<dyn ColdStore>> = match DatabaseClient::new(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await
    {
        Ok(client) => Some(Arc::new(FeatureRepository::new(client.pool()))),
        Err(e) => {
            warn!(error = %e, "PostgreSQL unavailable, running without cold store");
            None
        }
    };

    info!(
        hot = hot.is_some(),
        cold = cold.is_some(),
        "Feature store backends connected"
    );
    HybridFeatureStore::new(hot, cold, settings)
}
