//! Ingestion loop: raw tick messages in, routed ticks out.
//!
//! Messages arrive one per line as JSON in the transport shape
//! (`{"Symbol": .., "Timestamp": .., "Open": .., ..}`). Malformed messages are
//! logged and skipped. Every `refresh_every` messages the latest features of
//! every symbol are recomputed so the hot store stays fresh.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use tick_features_data::RawTick;

use crate::processor::FlushOutcome;
use crate::registry::ProcessorRegistry;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Ingested,
    /// Unparseable or missing fields; dropped.
    Malformed,
    /// Parsed but refused by its processor.
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub messages: u64,
    pub ingested: u64,
    pub malformed: u64,
    pub rejected: u64,
    pub refreshes: u64,
    pub symbols: usize,
    pub rows_flushed_on_shutdown: u64,
}

pub struct IngestPipeline {
    registry: Arc<ProcessorRegistry>,
    refresh_every: u64,
    summary: IngestSummary,
}

impl IngestPipeline {
    /// `refresh_every == 0` disables periodic refreshes.
    #[must_use]
    pub fn new(registry: Arc<ProcessorRegistry>, refresh_every: u64) -> Self {
        Self {
            registry,
            refresh_every,
            summary: IngestSummary::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ProcessorRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub const fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    /// Parses and routes one JSON message.
    pub async fn handle_message(&mut self, raw: &str) -> MessageOutcome {
        match RawTick::from_json(raw) {
            Ok(tick) => self.handle_tick(tick).await,
            Err(e) => {
                self.summary.messages += 1;
                self.summary.malformed += 1;
                warn!(error = %e, "Dropping malformed tick message");
                self.maybe_refresh().await;
                MessageOutcome::Malformed
            }
        }
    }

    /// Routes an already-parsed tick.
    pub async fn handle_tick(&mut self, tick: RawTick) -> MessageOutcome {
        self.summary.messages += 1;
        let symbol = tick.symbol.clone();

        let outcome = match self.registry.route(tick).await {
            Ok(()) => {
                self.summary.ingested += 1;
                MessageOutcome::Ingested
            }
            Err(e) => {
                self.summary.rejected += 1;
                warn!(symbol = %symbol, error = %e, "Tick rejected");
                MessageOutcome::Rejected
            }
        };

        self.maybe_refresh().await;
        outcome
    }

    async fn maybe_refresh(&mut self) {
        if self.refresh_every == 0 || self.summary.messages % self.refresh_every != 0 {
            return;
        }
        let refreshed = self.registry.refresh_all().await;
        self.summary.refreshes += 1;
        debug!(
            messages = self.summary.messages,
            symbols = refreshed.len(),
            "Refreshed latest features"
        );
    }

    /// Consumes newline-delimited JSON until end of input or until `shutdown`
    /// resolves, then shuts every processor down.
    ///
    /// # Errors
    /// Returns an error if reading from `input` fails. Processors are still
    /// shut down in that case.
    pub async fn run<R, S>(mut self, input: R, shutdown: S) -> anyhow::Result<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(shutdown);

        let read_result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping ingestion");
                    break Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            self.handle_message(line).await;
                        }
                    }
                    Ok(None) => {
                        info!("Input exhausted");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        let summary = self.finish().await;
        read_result.map_err(|e| anyhow::anyhow!("failed to read tick stream: {e}"))?;
        Ok(summary)
    }

    /// Shuts every processor down and returns the final counters.
    pub async fn finish(mut self) -> IngestSummary {
        self.summary.symbols = self.registry.len().await;

        let outcomes = self.registry.shutdown_all().await;
        self.summary.rows_flushed_on_shutdown = outcomes
            .iter()
            .map(|(_, outcome)| match outcome {
                FlushOutcome::Written(n) => *n,
                FlushOutcome::Nothing | FlushOutcome::Failed => 0,
            })
            .sum();

        info!(
            messages = self.summary.messages,
            ingested = self.summary.ingested,
            malformed = self.summary.malformed,
            rejected = self.summary.rejected,
            symbols = self.summary.symbols,
            "Ingestion finished"
        );
        self.summary
    }
}
