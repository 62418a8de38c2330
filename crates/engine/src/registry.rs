use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tick_features_data::{FeatureVector, RawTick};

use crate::error::EngineError;
use crate::processor::{FlushOutcome, ProcessorSettings, ProcessorStatus, SymbolProcessor};
use crate::store::HybridFeatureStore;

/// Symbol to processor mapping. Processors are created lazily on the first
/// tick for a symbol and all share one store.
pub struct ProcessorRegistry {
    processors: Arc<RwLock<HashMap<String, Arc<SymbolProcessor>>>>,
    store: Arc<HybridFeatureStore>,
    settings: ProcessorSettings,
}

impl ProcessorRegistry {
    /// # Errors
    /// Returns an error if `settings` cannot build a processor.
    pub fn new(
        store: Arc<HybridFeatureStore>,
        settings: ProcessorSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self {
            processors: Arc::new(RwLock::new(HashMap::new())),
            store,
            settings: ProcessorSettings {
                close_store_on_cleanup: false,
                ..settings
            },
        })
    }

    #[must_use]
    pub fn store(&self) -> Arc<HybridFeatureStore> {
        Arc::clone(&self.store)
    }

    pub async fn get(&self, symbol: &str) -> Option<Arc<SymbolProcessor>> {
        self.processors.read().await.get(symbol).cloned()
    }

    /// Returns the processor for `symbol`, starting one if needed.
    ///
    /// Startup (including recovery) runs outside the map lock so other
    /// symbols keep flowing.
    ///
    /// # Errors
    /// Returns an error if the processor cannot be constructed.
    pub async fn get_or_create(&self, symbol: &str) -> Result<Arc<SymbolProcessor>, EngineError> {
        if let Some(existing) = self.get(symbol).await {
            return Ok(existing);
        }

        let created = Arc::new(
            SymbolProcessor::start(symbol, Arc::clone(&self.store), self.settings.clone()).await?,
        );

        let mut processors = self.processors.write().await;
        if let Some(existing) = processors.get(symbol) {
            debug!(symbol, "Processor created concurrently, discarding duplicate");
            return Ok(Arc::clone(existing));
        }
        processors.insert(symbol.to_string(), Arc::clone(&created));
        info!(symbol, total = processors.len(), "Registered processor");
        Ok(created)
    }

    /// Routes a tick to its symbol's processor.
    ///
    /// # Errors
    /// Returns an error if the processor cannot be created or has shut down.
    pub async fn route(&self, tick: RawTick) -> Result<(), EngineError> {
        let processor = self.get_or_create(&tick.symbol).await?;
        processor.add_record(tick).await
    }

    /// Registered symbols, sorted.
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.processors.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn len(&self) -> usize {
        self.processors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processors.read().await.is_empty()
    }

    fn sorted(processors: &HashMap<String, Arc<SymbolProcessor>>) -> Vec<Arc<SymbolProcessor>> {
        let mut all: Vec<Arc<SymbolProcessor>> = processors.values().cloned().collect();
        all.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        all
    }

    /// Recomputes and stores the latest features for every symbol.
    pub async fn refresh_all(&self) -> Vec<(String, Option<FeatureVector>)> {
        let processors = Self::sorted(&*self.processors.read().await);

        let mut refreshed = Vec::with_capacity(processors.len());
        for processor in processors {
            let latest = processor.get_latest_features().await;
            if latest.is_none() {
                debug!(symbol = processor.symbol(), "No features yet");
            }
            refreshed.push((processor.symbol().to_string(), latest));
        }
        refreshed
    }

    pub async fn statuses(&self) -> Vec<ProcessorStatus> {
        let processors = Self::sorted(&*self.processors.read().await);

        let mut statuses = Vec::with_capacity(processors.len());
        for processor in processors {
            statuses.push(processor.status().await);
        }
        statuses
    }

    /// Cleans up every processor, then closes the shared store.
    pub async fn shutdown_all(&self) -> Vec<(String, FlushOutcome)> {
        let drained: Vec<Arc<SymbolProcessor>> = {
            let mut processors = self.processors.write().await;
            let all = Self::sorted(&processors);
            processors.clear();
            all
        };

        let mut outcomes = Vec::with_capacity(drained.len());
        for processor in drained {
            let outcome = processor.cleanup().await;
            if outcome == FlushOutcome::Failed {
                warn!(symbol = processor.symbol(), "Final flush failed");
            }
            outcomes.push((processor.symbol().to_string(), outcome));
        }

        self.store.close().await;
        info!(processors = outcomes.len(), "All processors shut down");
        outcomes
    }
}
