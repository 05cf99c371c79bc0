//! Background worker that batches queued points and writes them to the store

use super::writer::{is_retryable, StoreWriter};
use super::{report_error, SinkConfig, SinkCounters};
use crate::error::WriteError;
use crate::health::{Component, HealthRegistry};
use crate::models::MetricPoint;
use crate::observability::AgentMetrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub(crate) struct SinkWorker {
    config: SinkConfig,
    writer: Arc<dyn StoreWriter>,
    receiver: mpsc::Receiver<MetricPoint>,
    errors: mpsc::Sender<WriteError>,
    counters: Arc<SinkCounters>,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
    pending: Vec<MetricPoint>,
    /// Batches that failed for good since the last successful write
    consecutive_failures: u32,
}

impl SinkWorker {
    pub(crate) fn new(
        config: SinkConfig,
        writer: Arc<dyn StoreWriter>,
        receiver: mpsc::Receiver<MetricPoint>,
        errors: mpsc::Sender<WriteError>,
        counters: Arc<SinkCounters>,
        health: Option<HealthRegistry>,
    ) -> Self {
        let pending = Vec::with_capacity(config.max_batch_size);
        Self {
            config,
            writer,
            receiver,
            errors,
            counters,
            health,
            metrics: AgentMetrics::new(),
            pending,
            consecutive_failures: 0,
        }
    }

    /// Run until shutdown is signalled or every queue sender is gone,
    /// then drain whatever is still queued
    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            max_batch_size = self.config.max_batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis(),
            "Starting sink worker"
        );

        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(point) => {
                        self.pending.push(point);
                        if self.pending.len() >= self.config.max_batch_size {
                            self.flush().await;
                        }
                    }
                    None => break,
                },

                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        debug!(points = self.pending.len(), "Flushing partial batch");
                        self.flush().await;
                    }
                }

                _ = &mut shutdown => break,
            }
        }

        // Stop intake and drain what was accepted before close
        self.receiver.close();
        while let Some(point) = self.receiver.recv().await {
            self.pending.push(point);
            if self.pending.len() >= self.config.max_batch_size {
                self.flush().await;
            }
        }
        self.flush().await;

        info!(
            written = self.counters.written.load(Ordering::Relaxed),
            failed = self.counters.failed.load(Ordering::Relaxed),
            "Sink worker stopped"
        );
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        for chunk in batch.chunks(self.config.max_batch_size) {
            self.write_with_retry(chunk).await;
        }
        self.pending = Vec::with_capacity(self.config.max_batch_size);
    }

    async fn write_with_retry(&mut self, batch: &[MetricPoint]) {
        let mut retries = 0;
        loop {
            match self.writer.write_batch(batch).await {
                Ok(()) => {
                    self.counters
                        .written
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.counters.batches.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_batches_written();
                    self.consecutive_failures = 0;
                    if let Some(health) = &self.health {
                        health.set_healthy(Component::Sink).await;
                    }
                    debug!(points = batch.len(), "Batch written");
                    return;
                }
                Err(e) if retries < self.config.max_retries && is_retryable(&e) => {
                    retries += 1;
                    warn!(
                        error = %e,
                        retry = retries,
                        points = batch.len(),
                        "Failed to write batch, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retries = retries,
                        points = batch.len(),
                        "Failed to write batch"
                    );
                    self.counters
                        .failed
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.consecutive_failures += 1;
                    if let Some(health) = &self.health {
                        if self.consecutive_failures >= self.config.unhealthy_after {
                            let message = format!(
                                "{} consecutive batches failed, last: {}",
                                self.consecutive_failures, e
                            );
                            health.set_unhealthy(Component::Sink, message).await;
                        } else {
                            health.set_degraded(Component::Sink, e.to_string()).await;
                        }
                    }
                    report_error(&self.errors, e);
                    return;
                }
            }
        }
    }
}
