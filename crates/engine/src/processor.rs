//! Per-symbol processor.
//!
//! Owns one symbol's window and counters. Ingestion appends ticks; feature
//! computation is lazy and happens on [`SymbolProcessor::preprocess_for_ml`]
//! or on a flush. A background watcher flushes pending rows once the symbol
//! has been idle for the auto-flush timeout.
//!
//! Appending, flushing and the watcher's check all take the same lock, so a
//! flush always sees a consistent window and pending count.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tick_features_core::{flush_check_interval, ProcessorConfig};
use tick_features_data::{FeatureVector, RawTick};

use crate::buffer::WindowBuffer;
use crate::calculator::{FeatureCalculator, FeatureTable};
use crate::error::{EngineError, StoreError};
use crate::recovery::RecoveryService;
use crate::store::HybridFeatureStore;

/// Lower bound for the watcher cadence.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Initializing,
    Recovering,
    Running,
    Draining,
    Closed,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Recovering => "recovering",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was due.
    Nothing,
    /// A batch of this many rows was committed.
    Written(u64),
    /// The batch write failed. Pending rows are kept unless the failure was
    /// permanent (duplicate rows, no cold store).
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub window_size: usize,
    pub batch_write_threshold: usize,
    /// Zero disables the background watcher.
    pub auto_flush_timeout: Duration,
    pub recover_on_startup: bool,
    pub shutdown_timeout: Duration,
    /// Whether `cleanup` also closes the store. Registries sharing one store
    /// across processors turn this off and close it themselves.
    pub close_store_on_cleanup: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from_config(&ProcessorConfig::default())
    }
}

impl ProcessorSettings {
    #[must_use]
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            window_size: config.window_size,
            batch_write_threshold: config.batch_write_threshold,
            auto_flush_timeout: config.auto_flush_timeout(),
            recover_on_startup: config.recover_on_startup,
            shutdown_timeout: config.shutdown_timeout(),
            close_store_on_cleanup: true,
        }
    }

    /// # Errors
    /// Returns an error if the window size or batch threshold is zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_size == 0 {
            return Err(EngineError::InvalidCapacity(self.window_size));
        }
        if self.batch_write_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_write_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of a processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStatus {
    pub symbol: String,
    pub state: ProcessorState,
    pub buffer_len: usize,
    pub window_size: usize,
    pub total_records_processed: u64,
    pub pending_records: usize,
    pub seconds_since_last_record: Option<f64>,
}

#[derive(Debug)]
enum WatcherCommand {
    Shutdown,
}

struct WatcherHandle {
    commands: mpsc::Sender<WatcherCommand>,
    task: JoinHandle<()>,
}

struct ProcessorInner {
    buffer: WindowBuffer,
    total_records_processed: u64,
    pending_records: usize,
    last_record_time: Option<Instant>,
    state: ProcessorState,
}

struct Shared {
    symbol: String,
    settings: ProcessorSettings,
    store: Arc<HybridFeatureStore>,
    calculator: FeatureCalculator,
    inner: Mutex<ProcessorInner>,
}

pub struct SymbolProcessor {
    shared: Arc<Shared>,
    watcher: parking_lot::Mutex<Option<WatcherHandle>>,
}

impl SymbolProcessor {
    /// Builds a processor, optionally recovering its window from the cold
    /// store, and starts the auto-flush watcher.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid.
    pub async fn start(
        symbol: impl Into<String>,
        store: Arc<HybridFeatureStore>,
        settings: ProcessorSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let symbol = symbol.into();

        let shared = Arc::new(Shared {
            symbol: symbol.clone(),
            inner: Mutex::new(ProcessorInner {
                buffer: WindowBuffer::new(settings.window_size)?,
                total_records_processed: 0,
                pending_records: 0,
                last_record_time: None,
                state: ProcessorState::Initializing,
            }),
            calculator: FeatureCalculator::new(),
            store,
            settings,
        });

        if shared.settings.recover_on_startup {
            shared.recover().await;
        }

        let watcher = if shared.settings.auto_flush_timeout.is_zero() {
            debug!(symbol = %symbol, "Auto-flush disabled");
            None
        } else {
            Some(spawn_watcher(Arc::clone(&shared)))
        };

        {
            let mut inner = shared.inner.lock().await;
            inner.state = ProcessorState::Running;
            info!(
                symbol = %symbol,
                window_size = shared.settings.window_size,
                recovered = inner.buffer.size(),
                batch_write_threshold = shared.settings.batch_write_threshold,
                "Processor running"
            );
        }

        Ok(Self {
            shared,
            watcher: parking_lot::Mutex::new(watcher),
        })
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    /// Appends a tick. No features are computed here.
    ///
    /// # Errors
    /// Returns an error if the processor is shutting down or the tick
    /// belongs to another symbol.
    pub async fn add_record(&self, tick: RawTick) -> Result<(), EngineError> {
        if tick.symbol != self.shared.symbol {
            return Err(EngineError::SymbolMismatch {
                expected: self.shared.symbol.clone(),
                got: tick.symbol,
            });
        }

        let mut inner = self.shared.inner.lock().await;
        if inner.state != ProcessorState::Running {
            return Err(EngineError::ProcessorClosed(self.shared.symbol.clone()));
        }

        inner.buffer.add(tick);
        inner.total_records_processed += 1;
        inner.pending_records += 1;
        inner.last_record_time = Some(Instant::now());
        Ok(())
    }

    /// Recomputes features over the current window.
    ///
    /// With `store_features`, once pending records reach the batch threshold
    /// the newest `min(pending, rows)` rows are written to the cold store as
    /// one batch, and the newest row goes to the hot store. The hot write
    /// happens after the lock is released, so ingestion waits on at most one
    /// store call.
    pub async fn preprocess_for_ml(&self, store_features: bool) -> FeatureTable {
        let (table, newest) = {
            let mut inner = self.shared.inner.lock().await;
            let table = self
                .shared
                .calculator
                .calculate_all(&inner.buffer.snapshot());

            if !store_features || table.is_empty() {
                return table;
            }
            let rows = table.clone().into_vectors();
            self.shared.write_batch(&mut inner, &rows, false).await;
            (table, rows.last().cloned())
        };

        if let Some(newest) = newest {
            self.shared.store.store_latest(&newest).await;
        }
        table
    }

    /// Recomputes, stores, and returns the newest row; `None` for an empty window.
    pub async fn get_latest_features(&self) -> Option<FeatureVector> {
        self.preprocess_for_ml(true).await.into_vectors().pop()
    }

    /// Writes any pending rows regardless of the batch threshold.
    pub async fn flush_pending(&self) -> FlushOutcome {
        let mut inner = self.shared.inner.lock().await;
        self.shared.flush_locked(&mut inner).await
    }

    pub async fn pending_records(&self) -> usize {
        self.shared.inner.lock().await.pending_records
    }

    pub async fn total_records_processed(&self) -> u64 {
        self.shared.inner.lock().await.total_records_processed
    }

    pub async fn state(&self) -> ProcessorState {
        self.shared.inner.lock().await.state
    }

    pub async fn buffer_snapshot(&self) -> Vec<RawTick> {
        self.shared.inner.lock().await.buffer.snapshot()
    }

    pub async fn status(&self) -> ProcessorStatus {
        let inner = self.shared.inner.lock().await;
        ProcessorStatus {
            symbol: self.shared.symbol.clone(),
            state: inner.state,
            buffer_len: inner.buffer.size(),
            window_size: inner.buffer.capacity(),
            total_records_processed: inner.total_records_processed,
            pending_records: inner.pending_records,
            seconds_since_last_record: inner.last_record_time.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Stops the watcher, flushes whatever is pending, and closes the store
    /// if this processor owns it. Safe to call more than once.
    pub async fn cleanup(&self) -> FlushOutcome {
        {
            let mut inner = self.shared.inner.lock().await;
            if matches!(
                inner.state,
                ProcessorState::Draining | ProcessorState::Closed
            ) {
                return FlushOutcome::Nothing;
            }
            inner.state = ProcessorState::Draining;
        }

        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            self.stop_watcher(handle).await;
        }

        let outcome = {
            let mut inner = self.shared.inner.lock().await;
            let outcome = self.shared.flush_locked(&mut inner).await;
            inner.state = ProcessorState::Closed;
            outcome
        };

        if self.shared.settings.close_store_on_cleanup {
            self.shared.store.close().await;
        }

        info!(symbol = %self.shared.symbol, outcome = ?outcome, "Processor closed");
        outcome
    }

    async fn stop_watcher(&self, handle: WatcherHandle) {
        let WatcherHandle { commands, mut task } = handle;
        // A closed channel means the task already exited.
        let _ = commands.send(WatcherCommand::Shutdown).await;

        match tokio::time::timeout(self.shared.settings.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => debug!(symbol = %self.shared.symbol, "Auto-flush watcher stopped"),
            Ok(Err(e)) => warn!(symbol = %self.shared.symbol, error = %e, "Auto-flush watcher failed"),
            Err(_) => {
                warn!(
                    symbol = %self.shared.symbol,
                    timeout = ?self.shared.settings.shutdown_timeout,
                    "Auto-flush watcher did not stop in time, aborting"
                );
                task.abort();
            }
        }
    }
}

impl Drop for SymbolProcessor {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.task.abort();
        }
    }
}

impl Shared {
    async fn recover(&self) {
        self.inner.lock().await.state = ProcessorState::Recovering;

        let ticks = RecoveryService::new(Arc::clone(&self.store))
            .recover(&self.symbol, self.settings.window_size)
            .await;

        if !ticks.is_empty() {
            self.inner.lock().await.buffer.load_many(ticks);
        }
    }

    async fn flush_locked(&self, inner: &mut ProcessorInner) -> FlushOutcome {
        if inner.pending_records == 0 {
            return FlushOutcome::Nothing;
        }
        let rows = self
            .calculator
            .calculate_all(&inner.buffer.snapshot())
            .into_vectors();
        self.write_batch(inner, &rows, true).await
    }

    /// Cold write of the pending rows, if a batch is due.
    async fn write_batch(
        &self,
        inner: &mut ProcessorInner,
        rows: &[FeatureVector],
        force: bool,
    ) -> FlushOutcome {
        if rows.is_empty() {
            return FlushOutcome::Nothing;
        }

        let due = if force {
            inner.pending_records > 0
        } else {
            inner.pending_records >= self.settings.batch_write_threshold
        };
        if !due {
            return FlushOutcome::Nothing;
        }

        if inner.pending_records > rows.len() {
            warn!(
                symbol = %self.symbol,
                evicted = inner.pending_records - rows.len(),
                "Pending rows left the window before they were persisted"
            );
        }
        let take = inner.pending_records.min(rows.len());
        let batch = rows[rows.len() - take..].to_vec();

        match self.store.store_historical_batch(batch).await {
            Ok(written) => {
                debug!(symbol = %self.symbol, rows = written, forced = force, "Flushed pending rows");
                inner.pending_records = 0;
                FlushOutcome::Written(written)
            }
            Err(StoreError::Duplicate(detail)) => {
                error!(
                    symbol = %self.symbol,
                    detail = %detail,
                    "Batch rejected as duplicate, dropping pending rows"
                );
                inner.pending_records = 0;
                FlushOutcome::Failed
            }
            Err(e) if e.is_transient() => {
                warn!(
                    symbol = %self.symbol,
                    pending = inner.pending_records,
                    error = %e,
                    "Batch write failed, will retry"
                );
                FlushOutcome::Failed
            }
            Err(e) => {
                debug!(symbol = %self.symbol, error = %e, "Batch not persisted");
                inner.pending_records = 0;
                FlushOutcome::Failed
            }
        }
    }

    /// Flushes when rows are pending and the symbol has been idle long enough.
    async fn flush_if_idle(&self) -> Option<FlushOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.state != ProcessorState::Running || inner.pending_records == 0 {
            return None;
        }
        let idle = inner.last_record_time?.elapsed();
        if idle < self.settings.auto_flush_timeout {
            return None;
        }

        info!(
            symbol = %self.symbol,
            pending = inner.pending_records,
            idle_secs = idle.as_secs_f64(),
            "Auto-flushing idle symbol"
        );
        Some(self.flush_locked(&mut inner).await)
    }
}

fn spawn_watcher(shared: Arc<Shared>) -> WatcherHandle {
    let (tx, mut rx) = mpsc::channel(1);
    let cadence = flush_check_interval(shared.settings.auto_flush_timeout).max(MIN_CHECK_INTERVAL);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        debug!(symbol = %shared.symbol, cadence = ?cadence, "Auto-flush watcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(FlushOutcome::Failed) = shared.flush_if_idle().await {
                        warn!(symbol = %shared.symbol, "Auto-flush failed, retrying on next check");
                    }
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(WatcherCommand::Shutdown) => {
                            debug!(symbol = %shared.symbol, "Auto-flush watcher shutting down");
                        }
                        None => {
                            debug!(symbol = %shared.symbol, "Processor dropped, watcher exiting");
                        }
                    }
                    break;
                }
            }
        }
    });

    WatcherHandle { commands: tx, task }
}
