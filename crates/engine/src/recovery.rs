//! Window reconstruction from the cold store.

use std::sync::Arc;

use tick_features_data::RawTick;
use tracing::{info, warn};

use crate::store::HybridFeatureStore;

pub struct RecoveryService {
    store: Arc<HybridFeatureStore>,
}

impl RecoveryService {
    #[must_use]
    pub fn new(store: Arc<HybridFeatureStore>) -> Self {
        Self { store }
    }

    /// Loads up to `window_size` of the newest persisted rows for `symbol`
    /// and returns them as raw ticks in ascending timestamp order.
    ///
    /// An empty or unreachable cold store yields an empty result.
    pub async fn recover(&self, symbol: &str, window_size: usize) -> Vec<RawTick> {
        if window_size == 0 {
            return Vec::new();
        }

        let rows = match self
            .store
            .try_get_historical(symbol, None, None, window_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol, error = %e, "Recovery skipped, cold store unavailable");
                return Vec::new();
            }
        };

        if rows.is_empty() {
            warn!(symbol, "No persisted history to recover");
            return Vec::new();
        }

        let mut ticks: Vec<RawTick> = rows.iter().map(|row| row.to_tick()).collect();
        ticks.sort_by_key(|tick| tick.timestamp);

        info!(
            symbol,
            recovered = ticks.len(),
            from = %ticks[0].timestamp,
            to = %ticks[ticks.len() - 1].timestamp,
            "Recovered window from history"
        );
        ticks
    }
}
