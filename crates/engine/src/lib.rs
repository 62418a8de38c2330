//! Real-time per-symbol feature engine.
//!
//! Each symbol gets a [`SymbolProcessor`] that keeps a bounded window of raw
//! ticks, derives engineered features from it on demand, publishes the
//! freshest row to a hot store and batches history into a cold store. An idle
//! symbol's pending rows are flushed by a background watcher, and a restarted
//! processor rebuilds its window from the cold store.

pub mod backends;
pub mod buffer;
pub mod calculator;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod processor;
pub mod query;
pub mod recovery;
pub mod registry;
pub mod store;

pub use backends::connect_backends;
pub use buffer::WindowBuffer;
pub use calculator::{FeatureCalculator, FeatureTable};
pub use error::{EngineError, StoreError};
pub use memory::{MemoryColdStore, MemoryHotStore};
pub use pipeline::{IngestPipeline, IngestSummary, MessageOutcome};
pub use processor::{
    FlushOutcome, ProcessorSettings, ProcessorState, ProcessorStatus, SymbolProcessor,
};
pub use query::{FeatureQueryService, FeatureStats, DEFAULT_HISTORY_LIMIT};
pub use recovery::RecoveryService;
pub use registry::ProcessorRegistry;
pub use store::{ColdStore, HotStore, HybridFeatureStore, StoreSettings};
