//! Collector manager - owns the pipeline and its lifecycle
//!
//! ## Startup
//!
//! ```text
//! flush monitoring data → alert dispatcher → workers → UDP ingress
//!                       → aggregation scheduler → scale scheduler
//! ```
//!
//! Any failure rolls back what was already started and `start` returns the
//! error, so the manager is never left half-running.
//!
//! ## Shutdown
//!
//! ```text
//! ingress → scale scheduler → workers drain → aggregation final flush → alert dispatcher
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

use crate::actors::aggregator::AggregatorHandle;
use crate::actors::alert::AlertHandle;
use crate::actors::counters::{PipelineCounters, PipelineSnapshot};
use crate::actors::ingress::IngressHandle;
use crate::actors::messages::{
    AggregatorStats, AlertStats, CollectorAlert, ScalerStats, TickReport,
};
use crate::actors::pool::{WorkerPool, ensure_min_workers};
use crate::actors::queue::{QueueConsumer, QueueProducer, sample_queue};
use crate::actors::router::SampleRouter;
use crate::actors::scaler::ScalerHandle;
use crate::actors::worker::WorkerContext;
use crate::config::Config;
use crate::notify::NotificationRegistry;
use crate::storage::MonitoringStore;
use crate::supervisor::TaskSupervisor;
use crate::window::AggregationWindow;

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// How long shutdown waits for leftover tasks before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Initialized,
    Running,
    Stopped,
}

/// Point-in-time view of the whole collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub state: ManagerState,
    pub ingress_addr: Option<SocketAddr>,
    pub pool_size: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub pipeline: PipelineSnapshot,
    pub aggregator: Option<AggregatorStats>,
    pub scaler: Option<ScalerStats>,
    pub alerts: Option<AlertStats>,
}

pub struct CollectorManager {
    config: Config,
    state: ManagerState,
    store: Arc<dyn MonitoringStore>,
    counters: Arc<PipelineCounters>,
    queue: QueueProducer,
    consumer: Option<QueueConsumer>,
    pool: Arc<WorkerPool>,
    registry: Arc<NotificationRegistry>,
    alert_tx: broadcast::Sender<CollectorAlert>,
    ingress: Option<IngressHandle>,
    aggregator: Option<AggregatorHandle>,
    scaler: Option<ScalerHandle>,
    alerts: Option<AlertHandle>,
    supervisor: TaskSupervisor,
}

impl CollectorManager {
    /// Build every shared structure without starting any task
    pub fn initialize(config: Config, store: Arc<dyn MonitoringStore>) -> Result<Self> {
        config.validate()?;

        let counters = Arc::new(PipelineCounters::default());
        let (queue, consumer) = sample_queue(
            config.collector.queue_capacity,
            config.collector.enqueue_timeout(),
        );

        let context = WorkerContext::new(
            &config.collector,
            queue.clone(),
            store.clone(),
            counters.clone(),
        );
        let pool = Arc::new(WorkerPool::new(
            SampleRouter::new(),
            context,
            config.collector.worker_inbound_capacity,
        ));

        let registry = Arc::new(
            NotificationRegistry::from_config(&config.notifications)
                .context("invalid notification handler configuration")?,
        );
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            state: ManagerState::Initialized,
            store,
            counters,
            queue,
            consumer: Some(consumer),
            pool,
            registry,
            alert_tx,
            ingress: None,
            aggregator: None,
            scaler: None,
            alerts: None,
            supervisor: TaskSupervisor::new(),
        })
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drop whatever a previous run left in the store
    ///
    /// Safe to call any number of times, including on an empty store.
    #[instrument(skip(self))]
    pub async fn flush_monitoring_data(&self) -> Result<()> {
        self.store
            .reset()
            .await
            .context("failed to reset monitoring store")?;
        debug!("monitoring data flushed");
        Ok(())
    }

    /// Spawn the initial worker set; fewer than `min_workers` is an error
    pub async fn start_collector(&self) -> Result<usize> {
        ensure_min_workers(
            &self.pool,
            self.config.collector.initial_workers,
            self.config.scale.min_workers,
        )
        .await
    }

    /// Bind the UDP socket and start routing datagrams to the workers
    pub async fn create_load_balancer(&mut self) -> Result<SocketAddr> {
        let (handle, task) = IngressHandle::bind(
            &self.config.ingress,
            self.pool.router().clone(),
            self.counters.clone(),
        )
        .await?;

        let addr = handle.local_addr();
        self.supervisor.track("ingress", task);
        self.ingress = Some(handle);
        Ok(addr)
    }

    pub fn start_aggregate_scheduler(&mut self) -> Result<()> {
        let consumer = self
            .consumer
            .take()
            .context("aggregation scheduler was already started")?;

        let (handle, task) = AggregatorHandle::spawn(
            self.config.aggregation.clone(),
            consumer,
            self.store.clone(),
            self.counters.clone(),
            self.alert_tx.clone(),
        );
        self.supervisor.track("aggregator", task);
        self.aggregator = Some(handle);
        Ok(())
    }

    pub fn start_scale_scheduler(&mut self) {
        let (handle, task) = ScalerHandle::spawn(
            self.config.scale.clone(),
            self.pool.clone(),
            self.queue.clone(),
            self.alert_tx.clone(),
        );
        self.supervisor.track("scaler", task);
        self.scaler = Some(handle);
    }

    pub fn start_alert_dispatcher(&mut self) {
        let (handle, task) = AlertHandle::spawn(self.registry.clone(), self.alert_tx.subscribe());
        self.supervisor.track("alerts", task);
        self.alerts = Some(handle);
    }

    /// Bring the whole pipeline up
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ManagerState::Initialized {
            anyhow::bail!("collector manager cannot start from state {:?}", self.state);
        }

        if let Err(e) = self.start_components().await {
            error!("collector startup failed, rolling back: {e:#}");
            self.shutdown().await?;
            return Err(e);
        }

        self.state = ManagerState::Running;
        info!(
            "collector running on {} with {} workers",
            self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            self.pool.size()
        );
        Ok(())
    }

    async fn start_components(&mut self) -> Result<()> {
        self.flush_monitoring_data().await?;
        self.start_alert_dispatcher();
        self.start_collector().await?;
        self.create_load_balancer().await?;
        self.start_aggregate_scheduler()?;
        self.start_scale_scheduler();
        Ok(())
    }

    /// Stop everything without losing samples already accepted
    ///
    /// Idempotent; also used to roll back a failed start. A component that
    /// fails to stop is logged and the remaining ones are still stopped.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == ManagerState::Stopped {
            return Ok(());
        }
        info!("shutting down collector");

        if let Some(ingress) = self.ingress.take() {
            if let Err(e) = ingress.shutdown().await {
                error!("failed to stop ingress: {e:#}");
            }
            self.supervisor.join("ingress").await;
        }

        if let Some(scaler) = self.scaler.take() {
            if let Err(e) = scaler.shutdown().await {
                error!("failed to stop scaler: {e:#}");
            }
            self.supervisor.join("scaler").await;
        }

        self.pool.shutdown().await;

        if let Some(aggregator) = self.aggregator.take() {
            if let Err(e) = aggregator.shutdown().await {
                error!("failed to stop aggregator: {e:#}");
            }
            self.supervisor.join("aggregator").await;
        }

        if let Some(alerts) = self.alerts.take() {
            if let Err(e) = alerts.shutdown().await {
                error!("failed to stop alerts: {e:#}");
            }
            self.supervisor.join("alerts").await;
        }

        if !self.supervisor.is_empty() {
            debug!("waiting for remaining tasks: {:?}", self.supervisor.names());
        }
        self.supervisor.join_all_within(SHUTDOWN_GRACE).await;

        if let Err(e) = self.store.close().await {
            error!("failed to close monitoring store: {e}");
        }

        self.state = ManagerState::Stopped;
        info!("collector stopped: {:?}", self.counters.snapshot());
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ingress.as_ref().map(IngressHandle::local_addr)
    }

    pub fn counters(&self) -> PipelineSnapshot {
        self.counters.snapshot()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Cloneable control surface for the management API
    pub fn control(&self) -> CollectorControl {
        CollectorControl {
            state: self.state,
            store: self.store.clone(),
            counters: self.counters.clone(),
            queue: self.queue.clone(),
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            ingress: self.ingress.clone(),
            aggregator: self.aggregator.clone(),
            scaler: self.scaler.clone(),
            alerts: self.alerts.clone(),
        }
    }

    pub async fn status(&self) -> Result<CollectorStatus> {
        self.control().status().await
    }
}

/// Shared handles onto a running collector
#[derive(Clone)]
pub struct CollectorControl {
    state: ManagerState,
    store: Arc<dyn MonitoringStore>,
    counters: Arc<PipelineCounters>,
    queue: QueueProducer,
    pool: Arc<WorkerPool>,
    registry: Arc<NotificationRegistry>,
    ingress: Option<IngressHandle>,
    aggregator: Option<AggregatorHandle>,
    scaler: Option<ScalerHandle>,
    alerts: Option<AlertHandle>,
}

impl CollectorControl {
    pub fn store(&self) -> &Arc<dyn MonitoringStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<NotificationRegistry> {
        &self.registry
    }

    pub fn alerts(&self) -> Option<&AlertHandle> {
        self.alerts.as_ref()
    }

    pub async fn status(&self) -> Result<CollectorStatus> {
        // a stopped actor just leaves its section empty
        let aggregator = match &self.aggregator {
            Some(handle) => handle.stats().await.ok(),
            None => None,
        };
        let scaler = match &self.scaler {
            Some(handle) => handle.stats().await.ok(),
            None => None,
        };
        let alerts = match &self.alerts {
            Some(handle) => handle.stats().await.ok(),
            None => None,
        };

        Ok(CollectorStatus {
            state: self.state,
            ingress_addr: self.ingress.as_ref().map(IngressHandle::local_addr),
            pool_size: self.pool.size(),
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            pipeline: self.counters.snapshot(),
            aggregator,
            scaler,
            alerts,
        })
    }

    pub async fn open_windows(&self) -> Result<Vec<AggregationWindow>> {
        self.aggregator
            .as_ref()
            .context("aggregation scheduler is not running")?
            .open_windows()
            .await
    }

    pub async fn flush_now(&self) -> Result<TickReport> {
        self.aggregator
            .as_ref()
            .context("aggregation scheduler is not running")?
            .flush_now()
            .await
    }

    /// Mute alert dispatch for `duration_secs`; returns when the mute ends
    pub async fn mute_alerts(&self, duration_secs: u64) -> Result<Option<DateTime<Utc>>> {
        let alerts = self.alerts.as_ref().context("alert dispatcher is not running")?;
        alerts.mute_alerts(duration_secs).await?;
        Ok(alerts.stats().await?.muted_until)
    }

    pub async fn unmute_alerts(&self) -> Result<()> {
        self.alerts
            .as_ref()
            .context("alert dispatcher is not running")?
            .unmute_alerts()
            .await
    }

    /// Manual resize through the scale scheduler, clamped to the policy
    pub async fn scale_by(&self, delta: isize) -> Result<usize> {
        self.scaler
            .as_ref()
            .context("scale scheduler is not running")?
            .scale_by(delta)
            .await
    }
}
