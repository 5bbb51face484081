//! AggregatorActor - Rolls queued samples into time windows
//!
//! ## Tick
//!
//! ```text
//! drain queue (non-blocking, ≤ capacity) → assign window → update count/sum/min/max
//!                                        → flush windows with now > end + grace
//! ```
//!
//! Ticks run inside the actor loop, so they never overlap. A tick that takes
//! longer than the interval makes the timer skip the missed ticks and restart
//! from completion; skipped ticks are counted.
//!
//! A sample whose window is already past `end + grace` when it is drained is
//! counted late and dropped, so a flushed window is never re-opened.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::MetricSample;
use crate::config::AggregationConfig;
use crate::storage::MonitoringStore;
use crate::window::{AggregationWindow, WindowKey};

use super::counters::{PipelineCounters, bump_by};
use super::messages::{AggregatorCommand, AggregatorStats, AlertKind, CollectorAlert, TickReport};
use super::queue::QueueConsumer;

pub struct AggregatorActor {
    consumer: QueueConsumer,
    store: Arc<dyn MonitoringStore>,
    config: AggregationConfig,
    windows: BTreeMap<WindowKey, AggregationWindow>,
    counters: Arc<PipelineCounters>,
    alert_tx: broadcast::Sender<CollectorAlert>,
    command_rx: mpsc::Receiver<AggregatorCommand>,
    stats: AggregatorStats,
}

impl AggregatorActor {
    pub fn new(
        config: AggregationConfig,
        consumer: QueueConsumer,
        store: Arc<dyn MonitoringStore>,
        counters: Arc<PipelineCounters>,
        alert_tx: broadcast::Sender<CollectorAlert>,
        command_rx: mpsc::Receiver<AggregatorCommand>,
    ) -> Self {
        Self {
            consumer,
            store,
            config,
            windows: BTreeMap::new(),
            counters,
            alert_tx,
            command_rx,
            stats: AggregatorStats::default(),
        }
    }

    #[instrument(skip(self), fields(window_secs = self.config.window_secs))]
    pub async fn run(mut self) {
        debug!("starting aggregation scheduler");

        let period = self.config.tick_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    self.tick(Utc::now()).await;

                    let elapsed = started.elapsed();
                    if elapsed > period {
                        let skipped = (elapsed.as_nanos() / period.as_nanos()) as u64;
                        warn!("aggregation tick took {elapsed:?}, skipping {skipped} ticks");
                        self.stats.skipped_ticks += skipped;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AggregatorCommand::FlushNow { respond_to } => {
                            debug!("received FlushNow command");
                            let report = self.tick(Utc::now()).await;
                            let _ = respond_to.send(report);
                        }

                        AggregatorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        AggregatorCommand::GetOpenWindows { respond_to } => {
                            let _ = respond_to.send(self.windows.values().cloned().collect());
                        }

                        AggregatorCommand::Shutdown => {
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

        let report = self.finish(Utc::now()).await;
        info!(
            "aggregation scheduler stopped: final flush wrote {} windows, discarded {}",
            report.flushed, report.discarded
        );
    }

    /// One scheduler tick evaluated at `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let samples = self.consumer.drain();
        self.absorb_all(samples, now, &mut report);

        let closed: Vec<WindowKey> = self
            .windows
            .iter()
            .filter(|(_, window)| window.is_closed(now, self.config.grace_period()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in closed {
            if let Some(window) = self.windows.remove(&key) {
                self.flush_window(window, &mut report).await;
            }
        }

        self.stats.ticks += 1;
        self.stats.last_tick = Some(now);

        if report.drained > 0 || report.flushed > 0 {
            debug!(
                "tick drained {} samples ({} late), flushed {} windows",
                report.drained, report.late, report.flushed
            );
        }
        report
    }

    /// Drain whatever is left and flush every window
    ///
    /// Windows that have not reached `end + grace` yet are marked partial.
    pub async fn finish(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        while !self.consumer.is_empty() {
            let samples = self.consumer.drain();
            self.absorb_all(samples, now, &mut report);
        }

        let grace = self.config.grace_period();
        let windows = std::mem::take(&mut self.windows);
        for (_, mut window) in windows {
            window.partial = !window.is_closed(now, grace);
            self.flush_window(window, &mut report).await;
        }

        report
    }

    fn absorb_all(&mut self, samples: Vec<MetricSample>, now: DateTime<Utc>, report: &mut TickReport) {
        let total = samples.len();
        let mut late = 0;
        for sample in samples {
            if !self.absorb(sample, now) {
                late += 1;
            }
        }
        let merged = total - late;

        report.drained += total;
        report.late += late;
        self.stats.late_samples += late as u64;
        self.stats.samples_aggregated += merged as u64;
        bump_by(&self.counters.late, late as u64);
        bump_by(&self.counters.aggregated, merged as u64);
    }

    /// Merge one sample into its window; `false` if the window already closed
    fn absorb(&mut self, sample: MetricSample, now: DateTime<Utc>) -> bool {
        let width = self.config.window();
        let key = WindowKey::for_sample(&sample, width);

        if let Some(window) = self.windows.get_mut(&key) {
            if window.is_closed(now, self.config.grace_period()) {
                trace!("late sample for {}", window.metric);
                return false;
            }
            window.record(sample.value);
            return true;
        }

        let window = AggregationWindow::open(&key, width, sample.value);
        if window.is_closed(now, self.config.grace_period()) {
            trace!("late sample for {}", window.metric);
            return false;
        }
        self.windows.insert(key, window);
        true
    }

    async fn flush_window(&mut self, window: AggregationWindow, report: &mut TickReport) {
        let retries = self.config.flush_retry_attempts;
        let mut backoff = self.config.flush_retry_backoff();
        let mut attempt = 0;

        loop {
            match self.store.write_window(&window).await {
                Ok(()) => {
                    trace!("flushed window {}@{}", window.metric, window.start);
                    self.stats.windows_flushed += 1;
                    report.flushed += 1;
                    return;
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "failed to write window {}@{} (attempt {attempt}/{retries}), retrying in {backoff:?}: {e}",
                        window.metric, window.start
                    );
                    self.stats.flush_retries += 1;
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    error!(
                        "discarding window {}@{} with {} samples: {e}",
                        window.metric, window.start, window.count
                    );
                    self.stats.windows_discarded += 1;
                    report.discarded += 1;

                    let alert = CollectorAlert::new(AlertKind::WindowDiscarded {
                        metric: window.metric.clone(),
                        start: window.start,
                        count: window.count,
                        error: e.to_string(),
                    });
                    if self.alert_tx.send(alert).is_err() {
                        trace!("no receivers for discard alert");
                    }
                    return;
                }
            }
        }
    }

    fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            windows_open: self.windows.len(),
            ..self.stats.clone()
        }
    }
}

/// Handle for controlling the AggregatorActor
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    /// Spawn the aggregation scheduler; it becomes the only queue consumer
    pub fn spawn(
        config: AggregationConfig,
        consumer: QueueConsumer,
        store: Arc<dyn MonitoringStore>,
        counters: Arc<PipelineCounters>,
        alert_tx: broadcast::Sender<CollectorAlert>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AggregatorActor::new(config, consumer, store, counters, alert_tx, cmd_rx);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    /// Run a tick right away
    pub async fn flush_now(&self) -> Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::FlushNow { respond_to: tx })
            .await
            .context("failed to send FlushNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<AggregatorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn open_windows(&self) -> Result<Vec<AggregationWindow>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::GetOpenWindows { respond_to: tx })
            .await
            .context("failed to send GetOpenWindows command")?;
        rx.await.context("failed to receive response")
    }

    /// Ask for the final flush; join the task to wait for it
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AggregatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
