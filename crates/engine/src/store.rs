//! Hybrid hot/cold feature store.
//!
//! The hot store holds the freshest vector per symbol for low-latency reads.
//! The cold store holds the append-only history. Either side may be missing
//! or unreachable; callers keep computing features in memory regardless.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tick_features_core::ProcessorConfig;
use tick_features_data::FeatureVector;

use crate::error::StoreError;

/// Low-latency store for the latest vector and a bounded recency index.
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn put_latest(
        &self,
        vector: &FeatureVector,
        ttl: Duration,
        recency_cap: usize,
    ) -> anyhow::Result<()>;

    async fn get_latest(&self, symbol: &str) -> anyhow::Result<Option<FeatureVector>>;

    /// Newest first.
    async fn recent_timestamps(
        &self,
        symbol: &str,
        count: usize,
    ) -> anyhow::Result<Vec<DateTime<Utc>>>;

    async fn ping(&self) -> anyhow::Result<()>;

    async fn close(&self);
}

/// Durable, append-only history keyed by (symbol, timestamp).
#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Inserts every row or none of them.
    async fn insert_batch(&self, rows: &[FeatureVector]) -> Result<u64, StoreError>;

    /// Newest first, at most `limit` rows, optionally bounded (inclusive).
    async fn query_recent(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<FeatureVector>>;

    async fn count(&self, symbol: &str) -> anyhow::Result<u64>;

    async fn latest_timestamp(&self, symbol: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn symbols(&self) -> anyhow::Result<Vec<String>>;

    async fn ping(&self) -> anyhow::Result<()>;

    async fn close(&self);
}

/// Hot-store write parameters and the per-call deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub hot_ttl: Duration,
    pub recency_cap: usize,
    pub timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&ProcessorConfig::default())
    }
}

impl StoreSettings {
    #[must_use]
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            hot_ttl: config.hot_ttl(),
            recency_cap: config.recency_index_cap,
            timeout: config.store_timeout(),
        }
    }
}

pub struct HybridFeatureStore {
    hot: Option<Arc<dyn HotStore>>,
    cold: Option<Arc<dyn ColdStore>>,
    settings: StoreSettings,
    closed: AtomicBool,
}

impl HybridFeatureStore {
    #[must_use]
    pub fn new(
        hot: Option<Arc<dyn HotStore>>,
        cold: Option<Arc<dyn ColdStore>>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            hot,
            cold,
            settings,
            closed: AtomicBool::new(false),
        }
    }

    /// A store with no backends. Features are computed but never persisted.
    #[must_use]
    pub fn detached(settings: StoreSettings) -> Self {
        Self::new(None, None, settings)
    }

    #[must_use]
    pub const fn settings(&self) -> StoreSettings {
        self.settings
    }

    #[must_use]
    pub fn has_hot(&self) -> bool {
        self.hot.is_some()
    }

    #[must_use]
    pub fn has_cold(&self) -> bool {
        self.cold.is_some()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn hot(&self) -> Option<&Arc<dyn HotStore>> {
        self.hot.as_ref().filter(|_| !self.is_closed())
    }

    fn cold(&self) -> Result<&Arc<dyn ColdStore>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Unavailable(anyhow::anyhow!("feature store closed")));
        }
        self.cold.as_ref().ok_or(StoreError::NotConfigured("cold"))
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e)),
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: self.settings.timeout,
            }),
        }
    }

    /// Best-effort write of the freshest vector. Never fails; returns whether
    /// the hot store accepted the write.
    pub async fn store_latest(&self, vector: &FeatureVector) -> bool {
        let Some(hot) = self.hot() else {
            return false;
        };

        let vector = vector.clone().sanitized();
        let result = self
            .bounded(
                "store_latest",
                hot.put_latest(&vector, self.settings.hot_ttl, self.settings.recency_cap),
            )
            .await;

        match result {
            Ok(()) => {
                debug!(symbol = %vector.symbol, timestamp = %vector.timestamp, "Stored latest features");
                true
            }
            Err(e) => {
                warn!(symbol = %vector.symbol, error = %e, "Hot store write failed");
                false
            }
        }
    }

    /// Latest vector from the hot store. Missing entries and outages both
    /// read as `None`.
    pub async fn get_latest(&self, symbol: &str) -> Option<FeatureVector> {
        let hot = self.hot()?;
        match self.bounded("get_latest", hot.get_latest(symbol)).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(symbol, error = %e, "Hot store read failed");
                None
            }
        }
    }

    /// Newest-first timestamps from the recency index; empty on outage.
    pub async fn recent_timestamps(&self, symbol: &str, count: usize) -> Vec<DateTime<Utc>> {
        let Some(hot) = self.hot() else {
            return Vec::new();
        };
        match self
            .bounded("recent_timestamps", hot.recent_timestamps(symbol, count))
            .await
        {
            Ok(timestamps) => timestamps,
            Err(e) => {
                warn!(symbol, error = %e, "Recency index read failed");
                Vec::new()
            }
        }
    }

    /// Sanitizes `rows` and persists them as one atomic batch.
    ///
    /// # Errors
    /// - [`StoreError::Duplicate`] if any (symbol, timestamp) already exists;
    ///   nothing was written and the batch must not be retried
    /// - [`StoreError::Timeout`] / [`StoreError::Unavailable`] on outages
    /// - [`StoreError::NotConfigured`] when no cold store is attached
    pub async fn store_historical_batch(&self, rows: Vec<FeatureVector>) -> Result<u64, StoreError> {
        let cold = self.cold()?;
        if rows.is_empty() {
            return Ok(0);
        }

        let rows: Vec<FeatureVector> = rows.into_iter().map(FeatureVector::sanitized).collect();
        let inserted = match tokio::time::timeout(self.settings.timeout, cold.insert_batch(&rows))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Timeout {
                    operation: "store_historical_batch",
                    after: self.settings.timeout,
                })
            }
        };

        info!(
            symbol = %rows[0].symbol,
            rows = inserted,
            "Persisted feature batch"
        );
        Ok(inserted)
    }

    /// Historical rows, newest first.
    ///
    /// # Errors
    /// Returns an error if the cold store is missing, slow, or failing.
    pub async fn try_get_historical(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<FeatureVector>, StoreError> {
        let cold = self.cold()?;
        self.bounded("get_historical", cold.query_recent(symbol, start, end, limit))
            .await
    }

    /// Like [`Self::try_get_historical`] but any failure reads as no rows.
    pub async fn get_historical(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<FeatureVector> {
        match self.try_get_historical(symbol, start, end, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol, error = %e, "Historical read failed");
                Vec::new()
            }
        }
    }

    /// Stored row count for a symbol, `None` if the cold store cannot answer.
    pub async fn historical_count(&self, symbol: &str) -> Option<u64> {
        let cold = self.cold().ok()?;
        self.bounded("historical_count", cold.count(symbol))
            .await
            .map_err(|e| warn!(symbol, error = %e, "Row count failed"))
            .ok()
    }

    pub async fn latest_historical_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        let cold = self.cold().ok()?;
        self.bounded("latest_timestamp", cold.latest_timestamp(symbol))
            .await
            .map_err(|e| warn!(symbol, error = %e, "Latest timestamp query failed"))
            .ok()
            .flatten()
    }

    /// Distinct symbols in the cold store; empty on outage.
    pub async fn available_symbols(&self) -> Vec<String> {
        let Ok(cold) = self.cold() else {
            return Vec::new();
        };
        match self.bounded("available_symbols", cold.symbols()).await {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "Symbol listing failed");
                Vec::new()
            }
        }
    }

    pub async fn hot_available(&self) -> bool {
        match self.hot() {
            Some(hot) => self.bounded("hot_ping", hot.ping()).await.is_ok(),
            None => false,
        }
    }

    pub async fn cold_available(&self) -> bool {
        match self.cold() {
            Ok(cold) => self.bounded("cold_ping", cold.ping()).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Releases both backends. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hot) = &self.hot {
            hot.close().await;
        }
        if let Some(cold) = &self.cold {
            cold.close().await;
        }
        info!("Feature store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryColdStore, MemoryHotStore};
    use chrono::TimeZone;
    use tick_features_data::RawTick;

    fn vector(second: u32) -> FeatureVector {
        FeatureVector::from_tick(&RawTick {
            symbol: "ACME".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap(),
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0 + f64::from(second),
            volume: 100,
        })
    }

    fn settings() -> StoreSettings {
        StoreSettings {
            hot_ttl: Duration::from_secs(60),
            recency_cap: 3,
            timeout: Duration::from_millis(200),
        }
    }

    fn hybrid() -> (Arc<MemoryHotStore>, Arc<MemoryColdStore>, HybridFeatureStore) {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = Arc::new(MemoryColdStore::new());
        let store = HybridFeatureStore::new(
            Some(hot.clone() as Arc<dyn HotStore>),
            Some(cold.clone() as Arc<dyn ColdStore>),
            settings(),
        );
        (hot, cold, store)
    }

    #[tokio::test]
    async fn latest_round_trip() {
        let (_, _, store) = hybrid();
        assert!(store.get_latest("ACME").await.is_none());

        assert!(store.store_latest(&vector(1)).await);
        assert!(store.store_latest(&vector(2)).await);

        let latest = store.get_latest("ACME").await.unwrap();
        assert_eq!(latest, vector(2));
    }

    #[tokio::test]
    async fn recency_index_is_trimmed() {
        let (_, _, store) = hybrid();
        for second in 0..6 {
            store.store_latest(&vector(second)).await;
        }

        let recent = store.recent_timestamps("ACME", 10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0], vector(5).timestamp);
        assert_eq!(recent[2], vector(3).timestamp);
    }

    #[tokio::test]
    async fn hot_outage_is_not_an_error() {
        let (hot, _, store) = hybrid();
        hot.set_available(false);

        assert!(!store.store_latest(&vector(1)).await);
        assert!(store.get_latest("ACME").await.is_none());
        assert!(store.recent_timestamps("ACME", 5).await.is_empty());
        assert!(!store.hot_available().await);
    }

    #[tokio::test]
    async fn batch_is_sanitized_before_persisting() {
        let (_, cold, store) = hybrid();
        let mut row = vector(1);
        row.return_1 = Some(f64::NAN);
        row.ratio_avg_price_5_30 = Some(f64::INFINITY);
        row.avg_price_5 = Some(9.5);

        assert_eq!(store.store_historical_batch(vec![row]).await.unwrap(), 1);

        let stored = cold.rows_for("ACME");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].return_1, None);
        assert_eq!(stored[0].ratio_avg_price_5_30, None);
        assert_eq!(stored[0].avg_price_5, Some(9.5));
    }

    #[tokio::test]
    async fn duplicate_batch_leaves_count_unchanged() {
        let (_, cold, store) = hybrid();
        store
            .store_historical_batch(vec![vector(1), vector(2)])
            .await
            .unwrap();

        let err = store
            .store_historical_batch(vec![vector(3), vector(2)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.historical_count("ACME").await, Some(2));
        assert_eq!(cold.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn historical_is_newest_first_and_bounded() {
        let (_, _, store) = hybrid();
        store
            .store_historical_batch((0..10).map(vector).collect())
            .await
            .unwrap();

        let rows = store.get_historical("ACME", None, None, 4).await;
        let seconds: Vec<u32> = rows
            .iter()
            .map(|r| chrono::Timelike::second(&r.timestamp))
            .collect();
        assert_eq!(seconds, vec![9, 8, 7, 6]);

        let bounded = store
            .get_historical(
                "ACME",
                Some(vector(2).timestamp),
                Some(vector(4).timestamp),
                100,
            )
            .await;
        assert_eq!(bounded.len(), 3);

        assert!(store.get_historical("NONE", None, None, 10).await.is_empty());
        assert_eq!(
            store.latest_historical_timestamp("ACME").await,
            Some(vector(9).timestamp)
        );
        assert_eq!(store.available_symbols().await, vec!["ACME".to_string()]);
    }

    #[tokio::test]
    async fn slow_cold_store_times_out() {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = Arc::new(MemoryColdStore::new().with_latency(Duration::from_secs(2)));
        let store = HybridFeatureStore::new(
            Some(hot as Arc<dyn HotStore>),
            Some(cold.clone() as Arc<dyn ColdStore>),
            settings(),
        );

        let err = store
            .store_historical_batch(vec![vector(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(err.is_transient());
        assert!(store.get_historical("ACME", None, None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn missing_backends_degrade() {
        let store = HybridFeatureStore::detached(settings());

        assert!(!store.store_latest(&vector(1)).await);
        assert!(store.get_latest("ACME").await.is_none());
        assert!(matches!(
            store.store_historical_batch(vec![vector(1)]).await,
            Err(StoreError::NotConfigured("cold"))
        ));
        assert_eq!(store.historical_count("ACME").await, None);
        assert!(!store.cold_available().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (hot, cold, store) = hybrid();
        store.close().await;
        store.close().await;

        assert_eq!(hot.close_calls(), 1);
        assert_eq!(cold.close_calls(), 1);
        assert!(!store.store_latest(&vector(1)).await);
        assert!(store.store_historical_batch(vec![vector(1)]).await.is_err());
    }
}
