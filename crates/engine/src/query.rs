//! Read-side surface for dashboards and model scorers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tick_features_data::FeatureVector;

use crate::store::HybridFeatureStore;

/// Default row cap for historical reads.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Availability and volume summary for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureStats {
    pub symbol: String,
    pub hot_available: bool,
    pub cold_available: bool,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub historical_count: u64,
}

pub struct FeatureQueryService {
    store: Arc<HybridFeatureStore>,
}

impl FeatureQueryService {
    #[must_use]
    pub fn new(store: Arc<HybridFeatureStore>) -> Self {
        Self { store }
    }

    pub async fn latest_features(&self, symbol: &str) -> Option<FeatureVector> {
        self.store.get_latest(symbol).await
    }

    /// Newest-first rows, at most `limit`.
    pub async fn historical_features(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<FeatureVector> {
        self.store.get_historical(symbol, start, end, limit).await
    }

    pub async fn available_symbols(&self) -> Vec<String> {
        self.store.available_symbols().await
    }

    pub async fn recent_timestamps(&self, symbol: &str, count: usize) -> Vec<DateTime<Utc>> {
        self.store.recent_timestamps(symbol, count).await
    }

    /// The latest timestamp prefers the hot entry and falls back to the
    /// newest durable row.
    pub async fn feature_stats(&self, symbol: &str) -> FeatureStats {
        let hot_available = self.store.hot_available().await;
        let cold_available = self.store.cold_available().await;

        let hot_latest = if hot_available {
            self.store.get_latest(symbol).await.map(|v| v.timestamp)
        } else {
            None
        };

        let (cold_latest, historical_count) = if cold_available {
            (
                self.store.latest_historical_timestamp(symbol).await,
                self.store.historical_count(symbol).await.unwrap_or(0),
            )
        } else {
            (None, 0)
        };

        FeatureStats {
            symbol: symbol.to_string(),
            hot_available,
            cold_available,
            latest_timestamp: hot_latest.or(cold_latest),
            historical_count,
        }
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryColdStore, MemoryHotStore};
    use crate::store::{ColdStore, HotStore, StoreSettings};
    use chrono::TimeZone;
    use tick_features_data::RawTick;

    fn vector(minute: u32) -> FeatureVector {
        FeatureVector::from_tick(&RawTick {
            symbol: "ACME".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 9, 2, 15, minute, 0).unwrap(),
            open: 20.0,
            high: 21.0,
            low: 19.0,
            close: 20.5,
            volume: 300,
        })
    }

    fn service() -> (Arc<MemoryHotStore>, Arc<MemoryColdStore>, FeatureQueryService) {
        let hot = Arc::new(MemoryHotStore::new());
        let cold = Arc::new(MemoryColdStore::new());
        let store = Arc::new(HybridFeatureStore::new(
            Some(hot.clone() as Arc<dyn HotStore>),
            Some(cold.clone() as Arc<dyn ColdStore>),
            StoreSettings::default(),
        ));
        (hot, cold, FeatureQueryService::new(store))
    }

    #[tokio::test]
    async fn stats_for_unknown_symbol() {
        let (_, _, service) = service();
        let stats = service.feature_stats("NONE").await;

        assert!(stats.hot_available);
        assert!(stats.cold_available);
        assert_eq!(stats.latest_timestamp, None);
        assert_eq!(stats.historical_count, 0);
    }

    #[tokio::test]
    async fn stats_reflect_both_stores() {
        let (hot, cold, service) = service();
        cold.insert_batch(&[vector(0), vector(1), vector(2)])
            .await
            .unwrap();
        hot.put_latest(&vector(3), std::time::Duration::from_secs(60), 10)
            .await
            .unwrap();

        let stats = service.feature_stats("ACME").await;
        assert_eq!(stats.historical_count, 3);
        assert_eq!(stats.latest_timestamp, Some(vector(3).timestamp));
        assert_eq!(service.available_symbols().await, vec!["ACME"]);
        assert_eq!(service.recent_timestamps("ACME", 5).await.len(), 1);
    }

    #[tokio::test]
    async fn stats_fall_back_to_cold_timestamp() {
        let (hot, cold, service) = service();
        cold.insert_batch(&[vector(0), vector(7)]).await.unwrap();
        hot.set_available(false);

        let stats = service.feature_stats("ACME").await;
        assert!(!stats.hot_available);
        assert_eq!(stats.latest_timestamp, Some(vector(7).timestamp));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (_, cold, service) = service();
        cold.insert_batch(&[vector(1), vector(3), vector(2)])
            .await
            .unwrap();

        let rows = service.historical_features("ACME", None, None, 2).await;
        assert_eq!(rows, vec![vector(3), vector(2)]);
        assert!(service.latest_features("ACME").await.is_none());
    }
}
