//! Bounded sample queue between collector workers and the aggregation scheduler
//!
//! Many producers (one per worker), one logical consumer (the aggregation
//! scheduler). Capacity is fixed at construction. A producer facing a full
//! queue waits at most `enqueue_timeout` and then gives up, so a stalled
//! consumer turns into counted drops instead of stuck workers.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TryRecvError};

use crate::MetricSample;

/// Why a sample could not be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue stayed full for the whole enqueue timeout
    Timeout,

    /// The consumer is gone
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Timeout => write!(f, "sample queue full, enqueue timed out"),
            QueueError::Closed => write!(f, "sample queue closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Create a sample queue with the given capacity
pub fn sample_queue(capacity: usize, enqueue_timeout: Duration) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueProducer {
            tx,
            enqueue_timeout,
        },
        QueueConsumer { rx },
    )
}

/// Producer side, cloned into every worker
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<MetricSample>,
    enqueue_timeout: Duration,
}

impl QueueProducer {
    /// Push a sample, waiting at most the configured timeout on a full queue
    pub async fn push(&self, sample: MetricSample) -> Result<(), QueueError> {
        match self.tx.send_timeout(sample, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Samples currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Queue depth as a fraction of capacity
    pub fn fill_ratio(&self) -> f64 {
        self.depth() as f64 / self.capacity() as f64
    }
}

/// Consumer side, owned by the aggregation scheduler
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<MetricSample>,
}

impl QueueConsumer {
    /// Take everything that is available right now without waiting
    ///
    /// At most one queue capacity worth of samples is taken per call, so
    /// producers that keep refilling the queue cannot pin the caller.
    pub fn drain(&mut self) -> Vec<MetricSample> {
        let limit = self.rx.max_capacity();
        let mut samples = Vec::with_capacity(self.rx.len().min(limit));

        while samples.len() < limit {
            match self.rx.try_recv() {
                Ok(sample) => samples.push(sample),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        samples
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
