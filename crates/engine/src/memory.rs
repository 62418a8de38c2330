//! In-process hot and cold stores.
//!
//! Used by `--in-memory` runs and by tests. The cold store enforces the same
//! (symbol, timestamp) uniqueness and all-or-nothing batch semantics as the
//! Postgres table.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use tick_features_data::FeatureVector;

use crate::error::StoreError;
use crate::store::{ColdStore, HotStore};

struct HotEntry {
    vector: FeatureVector,
    expires_at: Instant,
}

#[derive(Default)]
struct HotState {
    latest: HashMap<String, HotEntry>,
    recency: HashMap<String, BTreeSet<DateTime<Utc>>>,
}

#[derive(Default)]
pub struct MemoryHotStore {
    state: Mutex<HotState>,
    offline: AtomicBool,
    write_latency: Option<Duration>,
    closes: AtomicUsize,
}

impl MemoryHotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `put_latest`.
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Simulates an outage when `false`.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Release);
    }

    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::Acquire) {
            anyhow::bail!("hot store offline");
        }
        Ok(())
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn put_latest(
        &self,
        vector: &FeatureVector,
        ttl: Duration,
        recency_cap: usize,
    ) -> anyhow::Result<()> {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }
        self.check()?;
        let mut state = self.state.lock();

        state.latest.insert(
            vector.symbol.clone(),
            HotEntry {
                vector: vector.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        let index = state.recency.entry(vector.symbol.clone()).or_default();
        index.insert(vector.timestamp);
        while index.len() > recency_cap {
            index.pop_first();
        }
        Ok(())
    }

    async fn get_latest(&self, symbol: &str) -> anyhow::Result<Option<FeatureVector>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .latest
            .get(symbol)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.vector.clone()))
    }

    async fn recent_timestamps(
        &self,
        symbol: &str,
        count: usize,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .recency
            .get(symbol)
            .map(|index| index.iter().rev().take(count).copied().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.check()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct ColdState {
    rows: Vec<FeatureVector>,
    keys: HashSet<(String, DateTime<Utc>)>,
    batches: Vec<usize>,
}

#[derive(Default)]
pub struct MemoryColdStore {
    state: Mutex<ColdState>,
    offline: AtomicBool,
    latency: Option<Duration>,
    closes: AtomicUsize,
}

impl MemoryColdStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, for exercising store timeouts.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulates an outage when `false`.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Release);
    }

    /// Sizes of every committed batch, in commit order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().batches.clone()
    }

    /// Stored rows for `symbol` in insertion order.
    #[must_use]
    pub fn rows_for(&self, symbol: &str) -> Vec<FeatureVector> {
        self.state
            .lock()
            .rows
            .iter()
            .filter(|row| row.symbol == symbol)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    async fn check(&self) -> anyhow::Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::Acquire) {
            anyhow::bail!("cold store offline");
        }
        Ok(())
    }
}

#[async_trait]
impl ColdStore for MemoryColdStore {
    async fn insert_batch(&self, rows: &[FeatureVector]) -> Result<u64, StoreError> {
        self.check().await.map_err(StoreError::Unavailable)?;
        let mut state = self.state.lock();

        let mut incoming = HashSet::with_capacity(rows.len());
        for row in rows {
            let key = (row.symbol.clone(), row.timestamp);
            if state.keys.contains(&key) || !incoming.insert(key) {
                return Err(StoreError::Duplicate(format!(
                    "({}, {}) already exists",
                    row.symbol, row.timestamp
                )));
            }
        }

        state.keys.extend(incoming);
        state.rows.extend_from_slice(rows);
        state.batches.push(rows.len());
        Ok(rows.len() as u64)
    }

    async fn query_recent(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> anyhow::Result<Vec<FeatureVector>> {
        self.check().await?;
        let state = self.state.lock();

        let mut rows: Vec<FeatureVector> = state
            .rows
            .iter()
            .filter(|row| row.symbol == symbol)
            .filter(|row| start.map_or(true, |s| row.timestamp >= s))
            .filter(|row| end.map_or(true, |e| row.timestamp <= e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count(&self, symbol: &str) -> anyhow::Result<u64> {
        self.check().await?;
        let state = self.state.lock();
        Ok(state.rows.iter().filter(|row| row.symbol == symbol).count() as u64)
    }

    async fn latest_timestamp(&self, symbol: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.check().await?;
        let state = self.state.lock();
        Ok(state
            .rows
            .iter()
            .filter(|row| row.symbol == symbol)
            .map(|row| row.timestamp)
            .max())
    }

    async fn symbols(&self) -> anyhow::Result<Vec<String>> {
        self.check().await?;
        let state = self.state.lock();
        let symbols: BTreeSet<String> = state.rows.iter().map(|row| row.symbol.clone()).collect();
        Ok(symbols.into_iter().collect())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.check().await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tick_features_data::RawTick;

    fn row(symbol: &str, second: u32) -> FeatureVector {
        FeatureVector::from_tick(&RawTick {
            symbol: symbol.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
        })
    }

    #[tokio::test]
    async fn duplicate_within_batch_is_rejected_atomically() {
        let cold = MemoryColdStore::new();
        let err = cold
            .insert_batch(&[row("ACME", 1), row("ACME", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(cold.count("ACME").await.unwrap(), 0);
        assert!(cold.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn same_timestamp_different_symbol_is_allowed() {
        let cold = MemoryColdStore::new();
        cold.insert_batch(&[row("ACME", 1), row("INIT", 1)])
            .await
            .unwrap();

        assert_eq!(
            cold.symbols().await.unwrap(),
            vec!["ACME".to_string(), "INIT".to_string()]
        );
    }

    #[tokio::test]
    async fn offline_cold_store_reports_unavailable() {
        let cold = MemoryColdStore::new();
        cold.set_available(false);

        let err = cold.insert_batch(&[row("ACME", 1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(cold.ping().await.is_err());

        cold.set_available(true);
        assert!(cold.ping().await.is_ok());
    }

    #[tokio::test]
    async fn expired_hot_entries_read_as_missing() {
        let hot = MemoryHotStore::new();
        hot.put_latest(&row("ACME", 1), Duration::ZERO, 10)
            .await
            .unwrap();

        assert!(hot.get_latest("ACME").await.unwrap().is_none());
        assert_eq!(hot.recent_timestamps("ACME", 10).await.unwrap().len(), 1);
    }
}
