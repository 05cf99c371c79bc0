//! Polling scheduler
//!
//! Drives periodic polling of every registered server. Each tick fans out one
//! Tokio task per target; a task fetches the target's vitals and hands a
//! valid point to the sink. The scheduler never waits for a cycle to finish
//! and no poll can block or fail another.

use crate::fetcher::VitalsFetcher;
use crate::health::{Component, HealthRegistry};
use crate::models::ServerTarget;
use crate::observability::{AgentMetrics, StructuredLogger, OUTCOME_SKIPPED, OUTCOME_WRITTEN};
use crate::registry::ServerRegistry;
use crate::sink::PointSink;
use anyhow::Result;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// What to do when a tick finds a target's previous poll still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Skip that target until its running poll finishes
    #[default]
    SkipInFlight,
    /// Start another poll alongside the running one
    Allow,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip_in_flight" => Ok(OverlapPolicy::SkipInFlight),
            "allow" => Ok(OverlapPolicy::Allow),
            other => Err(format!(
                "unknown overlap policy {other:?}, expected \"skip\" or \"allow\""
            )),
        }
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: Duration,
    pub overlap: OverlapPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            overlap: OverlapPolicy::default(),
        }
    }
}

/// Result of one dispatched poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A point was handed to the sink
    Written,
    /// The fetch failed; carries the error kind
    Failed(&'static str),
    /// The target's previous poll was still running
    Skipped,
}

/// Periodic poller over a fixed set of targets
pub struct Scheduler {
    fetcher: Arc<dyn VitalsFetcher>,
    sink: Arc<dyn PointSink>,
    targets: Arc<[ServerTarget]>,
    /// One flag per target position, set while a poll is running
    in_flight: Arc<[AtomicBool]>,
    config: SchedulerConfig,
    logger: StructuredLogger,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        fetcher: Arc<dyn VitalsFetcher>,
        sink: Arc<dyn PointSink>,
        registry: &ServerRegistry,
        config: SchedulerConfig,
        logger: StructuredLogger,
    ) -> Self {
        let targets = registry.shared();
        let in_flight = targets.iter().map(|_| AtomicBool::new(false)).collect();

        let metrics = AgentMetrics::new();
        metrics.set_targets_monitored(targets.len() as i64);

        Self {
            fetcher,
            sink,
            targets,
            in_flight,
            config,
            logger,
            metrics,
            health: None,
        }
    }

    /// Tick until shutdown is signalled
    ///
    /// The first tick fires immediately. Polls still running at shutdown are
    /// left to finish on their own.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            targets = self.targets.len(),
            overlap = ?self.config.overlap,
            "Starting polling scheduler"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cycle += 1;
                    let dispatched = self.dispatch_cycle();
                    debug!(cycle = cycle, dispatched = dispatched.len(), "Dispatched poll cycle");

                    if let Some(health) = &self.health {
                        tokio::spawn(report_cycle(cycle, dispatched, health.clone()));
                    }
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycle, "Shutting down polling scheduler");
                    break;
                }
            }
        }
    }

    /// Start one poll per target and return their handles
    ///
    /// Dropping the handles detaches the polls.
    pub fn dispatch_cycle(&self) -> Vec<JoinHandle<PollOutcome>> {
        (0..self.targets.len())
            .map(|index| self.dispatch(index))
            .collect()
    }

    fn dispatch(&self, index: usize) -> JoinHandle<PollOutcome> {
        let target = self.targets[index].clone();

        let guard = match self.config.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::SkipInFlight => {
                match InFlightGuard::acquire(Arc::clone(&self.in_flight), index) {
                    Some(guard) => Some(guard),
                    None => {
                        self.logger.log_poll_skipped(&target);
                        self.metrics.inc_poll(OUTCOME_SKIPPED);
                        return tokio::spawn(async { PollOutcome::Skipped });
                    }
                }
            }
        };

        tokio::spawn(poll_target(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.sink),
            target,
            self.logger.clone(),
            self.metrics.clone(),
            guard,
        ))
    }

    /// Get the number of targets polled per tick
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

/// Fetch one target and forward its point; never panics on poll errors
async fn poll_target(
    fetcher: Arc<dyn VitalsFetcher>,
    sink: Arc<dyn PointSink>,
    target: ServerTarget,
    logger: StructuredLogger,
    metrics: AgentMetrics,
    _guard: Option<InFlightGuard>,
) -> PollOutcome {
    let start = Instant::now();
    let result = fetcher.fetch(&target).await;
    metrics.observe_fetch_latency(start.elapsed().as_secs_f64());

    match result {
        Ok(point) => {
            logger.log_point_queued(&point);
            sink.write(point);
            metrics.inc_poll(OUTCOME_WRITTEN);
            PollOutcome::Written
        }
        Err(e) => {
            logger.log_poll_failed(&target, &e);
            metrics.inc_poll(e.kind());
            PollOutcome::Failed(e.kind())
        }
    }
}

/// Set scheduler health from the outcome of one finished cycle
///
/// A cycle where every attempted poll failed degrades the scheduler; any
/// written point restores it. A cycle of only skipped polls changes nothing.
async fn report_cycle(
    cycle: u64,
    handles: Vec<JoinHandle<PollOutcome>>,
    health: HealthRegistry,
) {
    let (mut written, mut failed) = (0usize, 0usize);
    for handle in handles {
        match handle.await {
            Ok(PollOutcome::Written) => written += 1,
            Ok(PollOutcome::Failed(_)) | Err(_) => failed += 1,
            Ok(PollOutcome::Skipped) => {}
        }
    }
    debug!(cycle = cycle, written = written, failed = failed, "Poll cycle finished");

    if written > 0 {
        health.set_healthy(Component::Scheduler).await;
    } else if failed > 0 {
        let message = format!("all {failed} polls failed in cycle {cycle}");
        health.set_degraded(Component::Scheduler, message).await;
    }
}

/// Marks a target as being polled until dropped
struct InFlightGuard {
    flags: Arc<[AtomicBool]>,
    index: usize,
}

impl InFlightGuard {
    fn acquire(flags: Arc<[AtomicBool]>, index: usize) -> Option<Self> {
        flags[index]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flags, index })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flags[self.index].store(false, Ordering::Release);
    }
}

/// Builder for creating the scheduler
pub struct SchedulerBuilder {
    fetcher: Option<Arc<dyn VitalsFetcher>>,
    sink: Option<Arc<dyn PointSink>>,
    registry: Option<ServerRegistry>,
    config: SchedulerConfig,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            fetcher: None,
            sink: None,
            registry: None,
            config: SchedulerConfig::default(),
            logger: None,
            health: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn VitalsFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PointSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(mut self, registry: ServerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.config.overlap = overlap;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Report scheduler health to a registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<Scheduler> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| anyhow::anyhow!("Fetcher is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Sink is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("Registry is required"))?;
        let logger = self
            .logger
            .ok_or_else(|| anyhow::anyhow!("Logger is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Polling interval must be greater than zero");
        }

        let mut scheduler = Scheduler::new(fetcher, sink, &registry, self.config, logger);
        scheduler.health = self.health;
        Ok(scheduler)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
