//! Collector worker pool
//!
//! Owns the worker tasks and the write side of the routing table. Membership
//! changes (`start_collector`, `resize`, `shutdown`) are serialized by one
//! async mutex, so the scale scheduler and a manual scale request can never
//! interleave.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::router::{SampleRouter, WorkerId, WorkerLoad};
use super::worker::{WorkerContext, WorkerHandle};

/// How long a freshly spawned worker may take to report ready
const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Members {
    /// Ordered like the routing table: oldest first
    workers: Vec<WorkerHandle>,
    next_id: WorkerId,
}

pub struct WorkerPool {
    router: SampleRouter,
    context: WorkerContext,
    inbound_capacity: usize,
    members: Mutex<Members>,
}

impl WorkerPool {
    pub fn new(router: SampleRouter, context: WorkerContext, inbound_capacity: usize) -> Self {
        Self {
            router,
            context,
            inbound_capacity,
            members: Mutex::new(Members::default()),
        }
    }

    pub fn router(&self) -> &SampleRouter {
        &self.router
    }

    /// Workers currently published in the routing table
    pub fn size(&self) -> usize {
        self.router.live_workers()
    }

    pub fn loads(&self) -> Vec<WorkerLoad> {
        self.router.worker_loads()
    }

    /// Spawn the initial set of workers
    ///
    /// Returns how many workers are running afterwards. Fails if a worker does
    /// not come up; workers that did start stay in the pool so the caller can
    /// shut them down.
    #[instrument(skip(self))]
    pub async fn start_collector(&self, initial: usize) -> Result<usize> {
        let mut members = self.members.lock().await;
        self.grow(&mut members, initial).await?;
        info!("started {} collector workers", members.workers.len());
        Ok(members.workers.len())
    }

    /// Grow (`delta > 0`) or shrink (`delta < 0`) the pool, returning the new size
    ///
    /// Shrinking below zero is clamped. A shrink only returns once every
    /// retired worker has drained the samples already routed to it.
    #[instrument(skip(self))]
    pub async fn resize(&self, delta: isize) -> Result<usize> {
        let mut members = self.members.lock().await;
        let before = members.workers.len();

        if delta > 0 {
            self.grow(&mut members, delta as usize).await?;
        } else if delta < 0 {
            Self::shrink(&self.router, &mut members, delta.unsigned_abs()).await;
        }

        let after = members.workers.len();
        if before != after {
            info!("resized collector pool from {before} to {after} workers");
        }
        Ok(after)
    }

    /// Retire every worker, letting each drain its inbound buffer
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut members = self.members.lock().await;
        let count = members.workers.len();
        Self::shrink(&self.router, &mut members, count).await;
        debug!("collector pool stopped");
    }

    async fn grow(&self, members: &mut Members, count: usize) -> Result<()> {
        for _ in 0..count {
            let id = members.next_id;
            members.next_id += 1;

            let pending = WorkerHandle::spawn(id, self.context.clone(), self.inbound_capacity);

            match tokio::time::timeout(READY_TIMEOUT, pending.ready).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    pending.handle.abort();
                    anyhow::bail!("collector worker {id} exited before becoming ready");
                }
                Err(_) => {
                    pending.handle.abort();
                    anyhow::bail!("collector worker {id} did not become ready in time");
                }
            }

            // only published once running, so a route never targets a missing worker
            self.router.insert(pending.route);
            members.workers.push(pending.handle);
            debug!("collector worker {id} joined the pool");
        }
        Ok(())
    }

    async fn shrink(router: &SampleRouter, members: &mut Members, count: usize) {
        let count = count.min(members.workers.len());
        if count == 0 {
            return;
        }

        let removed = router.remove_newest(count);
        let keep = members.workers.len() - count;
        let retired: Vec<WorkerHandle> = members.workers.drain(keep..).collect();

        if removed.len() != retired.len() {
            warn!(
                "routing table and pool disagree: {} routes removed, {} workers retired",
                removed.len(),
                retired.len()
            );
        }

        for worker in retired {
            let id = worker.id;
            worker.join().await;
            debug!("collector worker {id} drained and left the pool");
        }
    }
}

/// Start `initial` workers and fail unless at least `min` are running
pub async fn ensure_min_workers(pool: &WorkerPool, initial: usize, min: usize) -> Result<usize> {
    let started = pool
        .start_collector(initial)
        .await
        .context("failed to start collector workers")?;
    if started < min {
        anyhow::bail!("only {started} collector workers running, at least {min} required");
    }
    Ok(started)
}
