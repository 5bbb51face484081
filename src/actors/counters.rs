//! Lock-free pipeline counters
//!
//! Every sample that enters the collector ends up in exactly one terminal
//! counter: `aggregated`, `passthrough`, or one of the drop reasons. The hot
//! paths (ingress, workers) bump atomics instead of messaging an actor.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct PipelineCounters {
    /// Datagrams read from the socket
    pub datagrams: AtomicU64,

    /// Samples decoded from datagrams
    pub decoded: AtomicU64,

    /// Datagrams or entries that failed to decode
    pub malformed: AtomicU64,

    /// Samples handed to a worker
    pub routed: AtomicU64,

    /// Samples dropped because the target worker was saturated
    pub saturated: AtomicU64,

    /// Samples that failed worker validation
    pub invalid: AtomicU64,

    /// Samples pushed onto the sample queue
    pub enqueued: AtomicU64,

    /// Samples dropped after waiting too long on a full queue
    pub queue_timeouts: AtomicU64,

    /// Pass-through samples written straight to the store
    pub passthrough: AtomicU64,

    /// Pass-through samples lost because the store write failed
    pub passthrough_failures: AtomicU64,

    /// Samples merged into an aggregation window
    pub aggregated: AtomicU64,

    /// Samples whose window had already closed
    pub late: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn bump_by(counter: &AtomicU64, n: u64) {
    if n > 0 {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineSnapshot {
            datagrams: load(&self.datagrams),
            decoded: load(&self.decoded),
            malformed: load(&self.malformed),
            routed: load(&self.routed),
            saturated: load(&self.saturated),
            invalid: load(&self.invalid),
            enqueued: load(&self.enqueued),
            queue_timeouts: load(&self.queue_timeouts),
            passthrough: load(&self.passthrough),
            passthrough_failures: load(&self.passthrough_failures),
            aggregated: load(&self.aggregated),
            late: load(&self.late),
        }
    }
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub datagrams: u64,
    pub decoded: u64,
    pub malformed: u64,
    pub routed: u64,
    pub saturated: u64,
    pub invalid: u64,
    pub enqueued: u64,
    pub queue_timeouts: u64,
    pub passthrough: u64,
    pub passthrough_failures: u64,
    pub aggregated: u64,
    pub late: u64,
}

impl PipelineSnapshot {
    /// Samples dropped for a countable reason
    pub fn dropped(&self) -> u64 {
        self.malformed
            + self.saturated
            + self.invalid
            + self.queue_timeouts
            + self.passthrough_failures
            + self.late
    }
}
