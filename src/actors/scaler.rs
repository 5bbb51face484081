//! ScalerActor - Resizes the worker pool from observed load
//!
//! ## Load Signal
//!
//! ```text
//! load = max(queue depth / queue capacity, mean worker inbound fill)
//! ```
//!
//! ## Rule
//!
//! ```text
//! load > upper && size < max  → grow by min(step, max - size)
//! load < lower && size > min  → shrink by min(step, size - min)
//! otherwise                   → hold
//! ```
//!
//! Nothing happens within `cooldown` of the previous action, manual or not.
//!
//! ## Saturation State Machine
//!
//! Saturated means `load > upper` while the pool is already at `max_workers`:
//!
//! ```text
//! not saturated:
//!   grace_counter <= grace  → Ok
//!   grace_counter > grace   → BackToOk        (publish PoolRecovered)
//!
//! saturated:
//!   grace_counter < grace   → Exceeding       (increment, no alert)
//!   grace_counter == grace  → StartsToExceed  (publish PoolSaturated)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ScalePolicy;

use super::messages::{AlertKind, CollectorAlert, Evaluation, ScalerCommand, ScalerStats};
use super::pool::WorkerPool;
use super::queue::QueueProducer;
use super::router::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "workers", rename_all = "snake_case")]
pub enum ScaleDecision {
    Grow(usize),
    Shrink(usize),
    Hold,
    /// An action was due but the cooldown has not elapsed
    Cooldown,
}

/// Decide what to do for `load` with `size` workers
pub fn decide(policy: &ScalePolicy, load: f64, size: usize, in_cooldown: bool) -> ScaleDecision {
    // hard clamps apply regardless of load and cooldown
    if size < policy.min_workers {
        return ScaleDecision::Grow(policy.min_workers - size);
    }
    if size > policy.max_workers {
        return ScaleDecision::Shrink(size - policy.max_workers);
    }

    let wanted = if load > policy.upper_threshold && size < policy.max_workers {
        ScaleDecision::Grow(policy.step.min(policy.max_workers - size))
    } else if load < policy.lower_threshold && size > policy.min_workers {
        ScaleDecision::Shrink(policy.step.min(size - policy.min_workers))
    } else {
        return ScaleDecision::Hold;
    };

    if in_cooldown {
        ScaleDecision::Cooldown
    } else {
        wanted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationEvaluation {
    Ok,
    Exceeding,
    StartsToExceed,
    BackToOk,
}

impl SaturationEvaluation {
    pub fn evaluate(saturated: bool, grace: usize, current_grace: usize) -> Self {
        if !saturated {
            if current_grace > grace {
                return SaturationEvaluation::BackToOk;
            }
            return SaturationEvaluation::Ok;
        }

        if current_grace == grace {
            return SaturationEvaluation::StartsToExceed;
        }

        SaturationEvaluation::Exceeding
    }
}

/// Load figures read from the queue and the pool
#[derive(Debug, Clone, Copy, PartialEq)]
struct LoadReading {
    load: f64,
    queue_fill: f64,
    inbound_fill: f64,
    throughput_per_worker: f64,
}

pub struct ScalerActor {
    pool: Arc<WorkerPool>,
    queue: QueueProducer,
    policy: ScalePolicy,
    alert_tx: broadcast::Sender<CollectorAlert>,
    command_rx: mpsc::Receiver<ScalerCommand>,
    last_action: Option<Instant>,
    saturation_grace: usize,
    last_processed: HashMap<WorkerId, u64>,
    last_reading_at: Instant,
    stats: ScalerStats,
}

impl ScalerActor {
    pub fn new(
        policy: ScalePolicy,
        pool: Arc<WorkerPool>,
        queue: QueueProducer,
        alert_tx: broadcast::Sender<CollectorAlert>,
        command_rx: mpsc::Receiver<ScalerCommand>,
    ) -> Self {
        Self {
            pool,
            queue,
            policy,
            alert_tx,
            command_rx,
            last_action: None,
            saturation_grace: 0,
            last_processed: HashMap::new(),
            last_reading_at: Instant::now(),
            stats: ScalerStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scale scheduler");

        let period = self.policy.tick_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.evaluate().await {
                        warn!("scale evaluation failed: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ScalerCommand::EvaluateNow { respond_to } => {
                            debug!("received EvaluateNow command");
                            let _ = respond_to.send(self.evaluate().await);
                        }

                        ScalerCommand::ScaleBy { delta, respond_to } => {
                            debug!("received ScaleBy({delta}) command");
                            let _ = respond_to.send(self.scale_by(delta).await);
                        }

                        ScalerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        ScalerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("scale scheduler stopped");
    }

    async fn evaluate(&mut self) -> Result<Evaluation> {
        let reading = self.read_load();
        let size_before = self.pool.size();

        let in_cooldown = self
            .last_action
            .is_some_and(|at| at.elapsed() < self.policy.cooldown());
        let decision = decide(&self.policy, reading.load, size_before, in_cooldown);

        let size_after = match decision {
            ScaleDecision::Grow(n) => {
                let size = self.pool.resize(n as isize).await?;
                self.record_action(size_before, size, reading.load);
                size
            }
            ScaleDecision::Shrink(n) => {
                let size = self.pool.resize(-(n as isize)).await?;
                self.record_action(size_before, size, reading.load);
                size
            }
            ScaleDecision::Cooldown => {
                trace!("load {:.2} wants a resize, still cooling down", reading.load);
                self.stats.cooldown_holds += 1;
                size_before
            }
            ScaleDecision::Hold => size_before,
        };

        self.stats.evaluations += 1;
        self.stats.pool_size = size_after;
        self.stats.load = reading.load;
        self.stats.queue_fill = reading.queue_fill;
        self.stats.inbound_fill = reading.inbound_fill;
        self.stats.throughput_per_worker = reading.throughput_per_worker;

        self.check_saturation(reading.load, size_after);

        Ok(Evaluation {
            load: reading.load,
            decision,
            size_before,
            size_after,
        })
    }

    /// Manual resize, clamped to `[min_workers, max_workers]`
    async fn scale_by(&mut self, delta: isize) -> Result<usize> {
        let size = self.pool.size();
        let target = self
            .policy
            .clamp((size as isize).saturating_add(delta).max(0) as usize);

        if target == size {
            return Ok(size);
        }

        let new_size = self.pool.resize(target as isize - size as isize).await?;
        self.record_action(size, new_size, self.stats.load);
        self.stats.pool_size = new_size;
        Ok(new_size)
    }

    fn record_action(&mut self, before: usize, after: usize, load: f64) {
        if after > before {
            self.stats.scale_ups += 1;
        } else if after < before {
            self.stats.scale_downs += 1;
        }
        info!("scaled collector pool from {before} to {after} workers at load {load:.2}");
        self.last_action = Some(Instant::now());
        self.stats.last_action = Some(Utc::now());
    }

    fn read_load(&mut self) -> LoadReading {
        let queue_fill = self.queue.fill_ratio();
        let loads = self.pool.loads();

        let inbound_fill = if loads.is_empty() {
            0.0
        } else {
            loads.iter().map(|l| l.inbound_fill).sum::<f64>() / loads.len() as f64
        };

        let elapsed = self.last_reading_at.elapsed().as_secs_f64();
        self.last_reading_at = Instant::now();

        let mut processed = 0;
        let mut current = HashMap::with_capacity(loads.len());
        for load in &loads {
            let previous = self.last_processed.get(&load.id).copied().unwrap_or(0);
            processed += load.processed.saturating_sub(previous);
            current.insert(load.id, load.processed);
        }
        self.last_processed = current;

        let throughput_per_worker = if loads.is_empty() || elapsed <= 0.0 {
            0.0
        } else {
            processed as f64 / elapsed / loads.len() as f64
        };

        LoadReading {
            load: queue_fill.max(inbound_fill),
            queue_fill,
            inbound_fill,
            throughput_per_worker,
        }
    }

    fn check_saturation(&mut self, load: f64, size: usize) {
        let saturated = load > self.policy.upper_threshold && size >= self.policy.max_workers;

        match SaturationEvaluation::evaluate(
            saturated,
            self.policy.saturation_grace,
            self.saturation_grace,
        ) {
            SaturationEvaluation::Ok => {
                self.saturation_grace = 0;
            }
            SaturationEvaluation::Exceeding => {
                self.saturation_grace += 1;
            }
            SaturationEvaluation::StartsToExceed => {
                warn!("collector pool saturated at {size} workers, load {load:.2}");
                self.saturation_grace += 1;
                self.stats.saturated = true;
                self.publish(AlertKind::PoolSaturated { workers: size, load });
            }
            SaturationEvaluation::BackToOk => {
                info!("collector pool recovered, load {load:.2}");
                self.saturation_grace = 0;
                self.stats.saturated = false;
                self.publish(AlertKind::PoolRecovered { workers: size, load });
            }
        }
    }

    fn publish(&self, kind: AlertKind) {
        if self.alert_tx.send(CollectorAlert::new(kind)).is_err() {
            trace!("no receivers for pool alert");
        }
    }

    fn stats(&self) -> ScalerStats {
        ScalerStats {
            pool_size: self.pool.size(),
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling the ScalerActor
#[derive(Clone)]
pub struct ScalerHandle {
    sender: mpsc::Sender<ScalerCommand>,
}

impl ScalerHandle {
    pub fn spawn(
        policy: ScalePolicy,
        pool: Arc<WorkerPool>,
        queue: QueueProducer,
        alert_tx: broadcast::Sender<CollectorAlert>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = ScalerActor::new(policy, pool, queue, alert_tx, cmd_rx);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    /// Evaluate the load immediately instead of waiting for the next tick
    pub async fn evaluate_now(&self) -> Result<Evaluation> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScalerCommand::EvaluateNow { respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;
        rx.await.context("failed to receive response")?
    }

    /// Grow or shrink the pool by hand, returning the new size
    pub async fn scale_by(&self, delta: isize) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScalerCommand::ScaleBy {
                delta,
                respond_to: tx,
            })
            .await
            .context("failed to send ScaleBy command")?;
        rx.await.context("failed to receive response")?
    }

    pub async fn stats(&self) -> Result<ScalerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScalerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ScalerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
