//! CollectorWorker - Validates routed samples and forwards them
//!
//! ## Message Flow
//!
//! ```text
//! Ingress route → inbound buffer → validate ─┬─ pass-through metric → store.write_samples
//!                                            └─ everything else     → Sample Queue
//! ```
//!
//! A worker never stops because of a bad sample; every failure is counted.
//! It exits once its inbound channel is closed and empty, which is how the
//! pool retires it: the routing table drops the sender, the worker finishes
//! whatever was already routed to it.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::MetricSample;
use crate::config::CollectorConfig;
use crate::storage::MonitoringStore;

use super::counters::{PipelineCounters, bump};
use super::queue::{QueueError, QueueProducer};
use super::router::{RouteEntry, WorkerId};

static METRIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:\-]*$").expect("metric name pattern compiles")
});

/// Why a routed sample was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyMetric,
    InvalidMetricName(String),
    NonFiniteValue(f64),
    TooOld(DateTime<Utc>),
    InFuture(DateTime<Utc>),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyMetric => write!(f, "metric name is empty"),
            ValidationError::InvalidMetricName(name) => write!(f, "invalid metric name '{name}'"),
            ValidationError::NonFiniteValue(v) => write!(f, "value {v} is not finite"),
            ValidationError::TooOld(ts) => write!(f, "timestamp {ts} is too old"),
            ValidationError::InFuture(ts) => write!(f, "timestamp {ts} is too far in the future"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub struct SampleValidator {
    max_age: TimeDelta,
    max_future_skew: TimeDelta,
}

/// Seconds as a `TimeDelta`, saturating at the largest representable span
fn bounded_seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl SampleValidator {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            max_age: bounded_seconds(config.max_sample_age_secs),
            max_future_skew: bounded_seconds(config.max_future_skew_secs),
        }
    }

    pub fn validate(&self, sample: &MetricSample, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if sample.metric.is_empty() {
            return Err(ValidationError::EmptyMetric);
        }
        if !METRIC_NAME.is_match(&sample.metric) {
            return Err(ValidationError::InvalidMetricName(sample.metric.clone()));
        }
        if !sample.value.is_finite() {
            return Err(ValidationError::NonFiniteValue(sample.value));
        }
        // a bound outside the representable range accepts everything on that side
        if let Some(oldest) = now.checked_sub_signed(self.max_age) {
            if sample.timestamp < oldest {
                return Err(ValidationError::TooOld(sample.timestamp));
            }
        }
        if let Some(newest) = now.checked_add_signed(self.max_future_skew) {
            if sample.timestamp > newest {
                return Err(ValidationError::InFuture(sample.timestamp));
            }
        }
        Ok(())
    }
}

/// Everything a worker needs besides its own inbound channel
///
/// Shared by all workers of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: QueueProducer,
    pub store: Arc<dyn MonitoringStore>,
    pub validator: SampleValidator,
    pub passthrough: Arc<HashSet<String>>,
    pub counters: Arc<PipelineCounters>,
}

impl WorkerContext {
    pub fn new(
        config: &CollectorConfig,
        queue: QueueProducer,
        store: Arc<dyn MonitoringStore>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            queue,
            store,
            validator: SampleValidator::new(config),
            passthrough: Arc::new(config.passthrough_metrics.iter().cloned().collect()),
            counters,
        }
    }
}

pub struct CollectorWorker {
    id: WorkerId,
    inbound: mpsc::Receiver<MetricSample>,
    context: WorkerContext,
    processed: Arc<AtomicU64>,
}

impl CollectorWorker {
    /// Run until the inbound channel is closed and drained
    #[instrument(skip_all, fields(worker = self.id))]
    pub async fn run(mut self, ready: oneshot::Sender<WorkerId>) {
        debug!("starting collector worker");
        let _ = ready.send(self.id);

        while let Some(sample) = self.inbound.recv().await {
            self.process(sample).await;
            self.processed.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            "collector worker stopped after {} samples",
            self.processed.load(Ordering::Relaxed)
        );
    }

    async fn process(&self, sample: MetricSample) {
        let counters = &self.context.counters;

        if let Err(e) = self.context.validator.validate(&sample, Utc::now()) {
            trace!("dropping sample from {}: {e}", sample.source);
            bump(&counters.invalid);
            return;
        }

        if self.context.passthrough.contains(&sample.metric) {
            match self.context.store.write_samples(std::slice::from_ref(&sample)).await {
                Ok(()) => bump(&counters.passthrough),
                Err(e) => {
                    warn!("failed to write pass-through sample {}: {e}", sample.metric);
                    bump(&counters.passthrough_failures);
                }
            }
            return;
        }

        match self.context.queue.push(sample).await {
            Ok(()) => bump(&counters.enqueued),
            Err(QueueError::Timeout) => {
                trace!("sample queue full, dropping sample");
                bump(&counters.queue_timeouts);
            }
            Err(QueueError::Closed) => {
                warn!("sample queue closed, dropping sample");
                bump(&counters.queue_timeouts);
            }
        }
    }
}

/// Running worker owned by the pool
pub struct WorkerHandle {
    pub id: WorkerId,
    task: JoinHandle<()>,
}

/// A worker that has been spawned but not yet published in the routing table
pub(crate) struct PendingWorker {
    pub handle: WorkerHandle,
    pub route: RouteEntry,
    pub ready: oneshot::Receiver<WorkerId>,
}

impl WorkerHandle {
    /// Spawn a worker with an inbound buffer of `inbound_capacity` samples
    pub(crate) fn spawn(id: WorkerId, context: WorkerContext, inbound_capacity: usize) -> PendingWorker {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let processed = Arc::new(AtomicU64::new(0));

        let worker = CollectorWorker {
            id,
            inbound: inbound_rx,
            context,
            processed: processed.clone(),
        };
        let task = tokio::spawn(worker.run(ready_tx));

        PendingWorker {
            handle: WorkerHandle { id, task },
            route: RouteEntry {
                id,
                inbound: inbound_tx,
                processed,
            },
            ready: ready_rx,
        }
    }

    /// Wait for the worker to finish draining
    ///
    /// Only returns once the inbound sender has been dropped.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("collector worker {} terminated abnormally: {e}", self.id);
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
