//! Routing table shared by the UDP ingress and the worker pool
//!
//! The ingress reads the table on every sample; the pool writes it when it
//! resizes. Both go through one `RwLock`, so a routing decision always sees a
//! consistent set of live workers: a worker is inserted only after its task is
//! running, and removed (its inbound sender dropped) before it is told to stop.
//!
//! ```text
//! target = fnv1a64(source) % live_workers
//! ```

use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fnv::FnvHasher;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::MetricSample;

/// Identifier of a collector worker, unique for the lifetime of the pool
pub type WorkerId = u64;

/// Why a sample could not be handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// The target worker's inbound buffer is full
    Saturated(WorkerId),

    /// The pool currently has no workers
    NoWorkers,

    /// The target worker stopped consuming
    WorkerGone(WorkerId),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Saturated(id) => write!(f, "worker {id} is saturated"),
            RouteError::NoWorkers => write!(f, "no live workers"),
            RouteError::WorkerGone(id) => write!(f, "worker {id} is gone"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Stable routing index of `source` for a pool of `workers` workers
pub fn route_index(source: &str, workers: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(source.as_bytes());
    (hasher.finish() % workers.max(1) as u64) as usize
}

pub(crate) struct RouteEntry {
    pub id: WorkerId,
    pub inbound: mpsc::Sender<MetricSample>,
    pub processed: Arc<AtomicU64>,
}

/// Per-worker load figures read by the scale scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerLoad {
    pub id: WorkerId,
    /// Samples the worker has finished since it started
    pub processed: u64,
    /// Inbound buffer depth as a fraction of its capacity
    pub inbound_fill: f64,
}

#[derive(Default)]
struct RoutingTable {
    entries: Vec<RouteEntry>,
}

/// Cloneable view of the routing table
#[derive(Clone, Default)]
pub struct SampleRouter {
    table: Arc<RwLock<RoutingTable>>,
}

impl SampleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `sample` to the worker owning its source
    ///
    /// Never blocks: a full worker buffer drops the sample (newest) and
    /// reports `Saturated`.
    pub fn route(&self, sample: MetricSample) -> Result<WorkerId, RouteError> {
        let table = self.table.read();
        if table.entries.is_empty() {
            return Err(RouteError::NoWorkers);
        }

        let entry = &table.entries[route_index(&sample.source, table.entries.len())];
        match entry.inbound.try_send(sample) {
            Ok(()) => Ok(entry.id),
            Err(TrySendError::Full(_)) => Err(RouteError::Saturated(entry.id)),
            Err(TrySendError::Closed(_)) => Err(RouteError::WorkerGone(entry.id)),
        }
    }

    /// Worker that `source` would currently be routed to
    pub fn target(&self, source: &str) -> Option<WorkerId> {
        let table = self.table.read();
        if table.entries.is_empty() {
            return None;
        }
        Some(table.entries[route_index(source, table.entries.len())].id)
    }

    pub fn live_workers(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.table.read().entries.iter().map(|e| e.id).collect()
    }

    pub fn worker_loads(&self) -> Vec<WorkerLoad> {
        self.table
            .read()
            .entries
            .iter()
            .map(|e| WorkerLoad {
                id: e.id,
                processed: e.processed.load(Ordering::Relaxed),
                inbound_fill: fill_ratio(&e.inbound),
            })
            .collect()
    }

    pub(crate) fn insert(&self, entry: RouteEntry) {
        self.table.write().entries.push(entry);
    }

    /// Unpublish the `count` most recently added workers
    ///
    /// Dropping the removed senders closes each worker's inbound channel; the
    /// worker drains what was already routed to it and then exits.
    pub(crate) fn remove_newest(&self, count: usize) -> Vec<WorkerId> {
        let mut table = self.table.write();
        let keep = table.entries.len().saturating_sub(count);
        table.entries.drain(keep..).map(|e| e.id).collect()
    }
}

fn fill_ratio(inbound: &mpsc::Sender<MetricSample>) -> f64 {
    let max = inbound.max_capacity();
    (max - inbound.capacity()) as f64 / max as f64
}
