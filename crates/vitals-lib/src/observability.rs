//! Observability infrastructure for the vitals agent
//!
//! Provides:
//! - Prometheus metrics (poll outcomes, fetch latency, sink activity)
//! - Structured JSON logging with tracing

use crate::error::{FetchError, WriteError};
use crate::models::{MetricPoint, ServerTarget};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for fetch latency (in seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Outcome label for a successful poll
pub const OUTCOME_WRITTEN: &str = "written";

/// Outcome label for a poll skipped because the previous one was running
pub const OUTCOME_SKIPPED: &str = "skipped";

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    polls_total: IntCounterVec,
    fetch_latency_seconds: Histogram,
    targets_monitored: IntGauge,
    points_dropped: IntCounter,
    batches_written: IntCounter,
    write_errors: IntCounterVec,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            polls_total: register_int_counter_vec!(
                "vitals_agent_polls_total",
                "Polls by outcome (written, skipped or the fetch error kind)",
                &["outcome"]
            )
            .expect("Failed to register polls_total"),

            fetch_latency_seconds: register_histogram!(
                "vitals_agent_fetch_latency_seconds",
                "Time spent fetching a vitals document",
                FETCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            targets_monitored: register_int_gauge!(
                "vitals_agent_targets_monitored",
                "Number of servers in the registry"
            )
            .expect("Failed to register targets_monitored"),

            points_dropped: register_int_counter!(
                "vitals_agent_points_dropped_total",
                "Points dropped before reaching the write queue"
            )
            .expect("Failed to register points_dropped"),

            batches_written: register_int_counter!(
                "vitals_agent_batches_written_total",
                "Batches acknowledged by the store"
            )
            .expect("Failed to register batches_written"),

            write_errors: register_int_counter_vec!(
                "vitals_agent_write_errors_total",
                "Store write failures by kind",
                &["kind"]
            )
            .expect("Failed to register write_errors"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    /// Count a finished or skipped poll
    pub fn inc_poll(&self, outcome: &str) {
        self.inner().polls_total.with_label_values(&[outcome]).inc();
    }

    /// Current count for a poll outcome
    pub fn poll_count(&self, outcome: &str) -> u64 {
        self.inner().polls_total.with_label_values(&[outcome]).get()
    }

    /// Record a fetch latency observation
    pub fn observe_fetch_latency(&self, duration_secs: f64) {
        self.inner().fetch_latency_seconds.observe(duration_secs);
    }

    pub fn set_targets_monitored(&self, count: i64) {
        self.inner().targets_monitored.set(count);
    }

    pub fn inc_points_dropped(&self) {
        self.inner().points_dropped.inc();
    }

    pub fn inc_batches_written(&self) {
        self.inner().batches_written.inc();
    }

    pub fn inc_write_errors(&self, kind: &str) {
        self.inner().write_errors.with_label_values(&[kind]).inc();
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for polls, writes
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    bucket: String,
}

impl StructuredLogger {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, targets: usize, interval_minutes: u64) {
        info!(
            event = "agent_started",
            bucket = %self.bucket,
            agent_version = %version,
            targets = targets,
            interval_minutes = interval_minutes,
            "Vitals agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            bucket = %self.bucket,
            reason = %reason,
            "Vitals agent shutting down"
        );
    }

    /// Log a poll that produced no point
    pub fn log_poll_failed(&self, target: &ServerTarget, err: &FetchError) {
        warn!(
            event = "poll_failed",
            bucket = %self.bucket,
            server = %target.name,
            url = %target.url,
            kind = err.kind(),
            error = %err,
            "Failed to poll server"
        );
    }

    /// Log a tick that found the previous poll still running
    pub fn log_poll_skipped(&self, target: &ServerTarget) {
        warn!(
            event = "poll_skipped",
            bucket = %self.bucket,
            server = %target.name,
            url = %target.url,
            "Previous poll still in flight, skipping server this tick"
        );
    }

    /// Log a point handed to the sink
    pub fn log_point_queued(&self, point: &MetricPoint) {
        info!(
            event = "point_queued",
            bucket = %self.bucket,
            server = %point.server,
            mem_percent = point.fields.mem_percent,
            disk_percent = point.fields.disk_percent,
            cpu_percent = point.fields.cpu_percent,
            "Data written for server"
        );
    }

    /// Log a failure reported on the sink's error stream
    pub fn log_write_error(&self, err: &WriteError) {
        error!(
            event = "store_write_failed",
            bucket = %self.bucket,
            kind = err.kind(),
            error = %err,
            "Store write error"
        );
    }
}
