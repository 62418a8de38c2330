use std::time::Duration;
use thiserror::Error;

/// Construction and lifecycle errors. Construction errors are fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("window capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    #[error("invalid processor configuration: {0}")]
    InvalidConfig(String),

    #[error("processor for {0} is shut down")]
    ProcessorClosed(String),

    #[error("tick for {got} routed to processor for {expected}")]
    SymbolMismatch { expected: String, got: String },
}

/// Errors surfaced by hot/cold store calls.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch collided with an already-persisted (symbol, timestamp).
    /// Nothing was written; the same batch must not be retried.
    #[error("duplicate feature row: {0}")]
    Duplicate(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("no {0} store configured")]
    NotConfigured(&'static str),
}

impl StoreError {
    /// Whether a retry of the same operation could succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}
