//! Asynchronous write path into the time-series store
//!
//! This module provides:
//! - A non-blocking [`PointSink::write`] backed by a bounded queue
//! - A background worker that batches points and writes them as line protocol
//! - A side channel of [`WriteError`]s reported after the fact
//!
//! Points that cannot be queued are dropped and reported on the error stream
//! as [`WriteError::QueueFull`]. `write` never waits on the store. The error
//! stream ends once [`MetricsSink::close`] returns and buffered errors are read.

mod line_protocol;
mod worker;
mod writer;


pub use line_protocol::{encode_batch, encode_point};
pub use writer::{is_retryable, InfluxWriter, StoreConfig, StoreWriter};

use crate::error::{ConfigError, WriteError};
use crate::health::{Component, HealthRegistry};
use crate::models::MetricPoint;
use crate::observability::AgentMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use worker::SinkWorker;

/// Anything that accepts points without blocking the caller
pub trait PointSink: Send + Sync {
    /// Queue a point for writing; failures surface asynchronously
    fn write(&self, point: MetricPoint);
}

/// Configuration for the sink queue and batching worker
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Points that can wait for the worker before new ones are dropped
    pub queue_capacity: usize,
    /// Maximum points per store request
    pub max_batch_size: usize,
    /// Maximum time a partial batch waits before it is written
    pub flush_interval: Duration,
    /// Extra attempts for a batch that failed with a retryable error
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Write errors buffered for the error stream
    pub error_capacity: usize,
    /// Consecutive failed batches before the sink reports itself unhealthy
    pub unhealthy_after: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_batch_size: 500,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            error_capacity: 1_000,
            unhealthy_after: 3,
        }
    }
}

impl SinkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("sink queue capacity must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("sink batch size must be > 0".into()));
        }
        if self.error_capacity == 0 {
            return Err(ConfigError::Invalid("sink error capacity must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid("sink flush interval must be > 0".into()));
        }
        if self.unhealthy_after == 0 {
            return Err(ConfigError::Invalid(
                "sink unhealthy threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Counters shared between the sink handle and its worker
#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    pub(crate) queued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) written: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) batches: AtomicU64,
}

/// Snapshot of sink activity
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SinkStats {
    /// Points accepted onto the queue
    pub points_queued: u64,
    /// Points rejected because the queue was full or closed
    pub points_dropped: u64,
    /// Points the store acknowledged
    pub points_written: u64,
    /// Points in batches that failed for good
    pub points_failed: u64,
    pub batches_written: u64,
}

/// Handle to the store write path
pub struct MetricsSink {
    queue: mpsc::Sender<MetricPoint>,
    /// Dropped on close so the error stream can end
    errors_tx: Mutex<Option<mpsc::Sender<WriteError>>>,
    errors_rx: Mutex<Option<mpsc::Receiver<WriteError>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<SinkCounters>,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
}

impl MetricsSink {
    /// Open a sink writing to an InfluxDB store with default settings
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(store: StoreConfig) -> Result<Self, ConfigError> {
        Self::builder().store(store).open()
    }

    pub fn builder() -> SinkBuilder {
        SinkBuilder::new()
    }

    /// Take the stream of asynchronous write failures
    ///
    /// The stream can be taken once; later calls return `None`.
    pub fn errors(&self) -> Option<ReceiverStream<WriteError>> {
        take(&self.errors_rx).map(ReceiverStream::new)
    }

    /// Stop accepting points, flush everything queued and wait for the worker
    ///
    /// Once this returns the error stream ends after its buffered errors.
    /// Calling this more than once is harmless.
    pub async fn close(&self) {
        if let Some(shutdown) = take(&self.shutdown) {
            let _ = shutdown.send(());
        }

        let Some(worker) = take(&self.worker) else {
            return;
        };
        if let Err(e) = worker.await {
            error!(error = %e, "Sink worker terminated abnormally");
            if let Some(health) = &self.health {
                health
                    .set_unhealthy(Component::Sink, format!("worker terminated: {e}"))
                    .await;
            }
        }
        drop(take(&self.errors_tx));

        let stats = self.stats();
        info!(
            queued = stats.points_queued,
            written = stats.points_written,
            dropped = stats.points_dropped,
            failed = stats.points_failed,
            "Metrics sink closed"
        );
    }

    /// Get current sink statistics
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            points_queued: self.counters.queued.load(Ordering::Relaxed),
            points_dropped: self.counters.dropped.load(Ordering::Relaxed),
            points_written: self.counters.written.load(Ordering::Relaxed),
            points_failed: self.counters.failed.load(Ordering::Relaxed),
            batches_written: self.counters.batches.load(Ordering::Relaxed),
        }
    }
}

impl PointSink for MetricsSink {
    fn write(&self, point: MetricPoint) {
        match self.queue.try_send(point) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(point)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_points_dropped();
                warn!(server = %point.server, "Write queue full, dropping point");
                self.report(WriteError::QueueFull { server: point.server });
            }
            Err(TrySendError::Closed(point)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_points_dropped();
                debug!(server = %point.server, "Sink closed, dropping point");
                self.report(WriteError::Closed { server: point.server });
            }
        }
    }
}

impl MetricsSink {
    fn report(&self, err: WriteError) {
        let errors = self.errors_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match errors.as_ref() {
            Some(errors) => report_error(errors, err),
            None => debug!(error = %err, "Error stream ended, not reporting"),
        }
    }
}

/// Builder for opening a [`MetricsSink`]
pub struct SinkBuilder {
    store: Option<StoreConfig>,
    writer: Option<Arc<dyn StoreWriter>>,
    config: SinkConfig,
    health: Option<HealthRegistry>,
}

impl SinkBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            store: None,
            writer: None,
            config: SinkConfig::default(),
            health: None,
        }
    }

    /// Write to an InfluxDB store
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// Write through a custom writer instead of InfluxDB
    pub fn writer(mut self, writer: Arc<dyn StoreWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Set the queue and batching configuration
    pub fn config(mut self, config: SinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Report sink health to a registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawn the worker and return the sink handle
    pub fn open(self) -> Result<MetricsSink, ConfigError> {
        self.config.validate()?;

        let writer: Arc<dyn StoreWriter> = match (self.writer, self.store) {
            (Some(writer), _) => writer,
            (None, Some(store)) => Arc::new(InfluxWriter::new(&store)?),
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "sink needs a store or a writer".into(),
                ))
            }
        };

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(self.config.error_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(SinkCounters::default());

        let worker = SinkWorker::new(
            self.config,
            writer,
            queue_rx,
            errors_tx.clone(),
            Arc::clone(&counters),
            self.health.clone(),
        );
        let handle = tokio::spawn(worker.run(shutdown_rx));

        Ok(MetricsSink {
            queue: queue_tx,
            errors_tx: Mutex::new(Some(errors_tx)),
            errors_rx: Mutex::new(Some(errors_rx)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(handle)),
            counters,
            metrics: AgentMetrics::new(),
            health: self.health,
        })
    }
}

impl Default for SinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand an error to the error stream without ever waiting on it
pub(crate) fn report_error(errors: &mpsc::Sender<WriteError>, err: WriteError) {
    AgentMetrics::new().inc_write_errors(err.kind());
    match errors.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            warn!(error = %err, "Write error stream full, dropping error");
        }
        Err(TrySendError::Closed(err)) => {
            debug!(error = %err, "Write error stream dropped");
        }
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}
