//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Stats**: Plain snapshots returned over oneshot channels

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::scaler::ScaleDecision;
use crate::window::AggregationWindow;

/// Event published when the collector needs operator attention
///
/// Broadcast to the AlertActor, which fans it out to the registered
/// notification handlers. Lagging subscribers may miss events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorAlert {
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
}

impl CollectorAlert {
    pub fn new(kind: AlertKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    /// Load stayed above the upper threshold while the pool was at its maximum
    PoolSaturated { workers: usize, load: f64 },

    /// Load fell back below the upper threshold after a saturation alert
    PoolRecovered { workers: usize, load: f64 },

    /// A window could not be written after every retry
    WindowDiscarded {
        metric: String,
        start: DateTime<Utc>,
        count: u64,
        error: String,
    },
}

impl AlertKind {
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::PoolSaturated { .. } => "Collector pool saturated",
            AlertKind::PoolRecovered { .. } => "Collector pool recovered",
            AlertKind::WindowDiscarded { .. } => "Aggregation window discarded",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::PoolSaturated { workers, load } => write!(
                f,
                "load {:.0}% with all {workers} workers running",
                load * 100.0
            ),
            AlertKind::PoolRecovered { workers, load } => {
                write!(f, "load back to {:.0}% on {workers} workers", load * 100.0)
            }
            AlertKind::WindowDiscarded {
                metric,
                start,
                count,
                error,
            } => write!(
                f,
                "window {metric}@{} with {count} samples was dropped: {error}",
                start.to_rfc3339()
            ),
        }
    }
}

/// Commands that can be sent to the IngressActor
#[derive(Debug)]
pub enum IngressCommand {
    GetStats {
        respond_to: oneshot::Sender<IngressStats>,
    },

    /// Stop reading from the socket; the socket is closed when the actor exits
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressStats {
    pub local_addr: SocketAddr,
    pub datagrams: u64,
    pub decoded: u64,
    pub malformed: u64,
    pub routed: u64,
    pub saturated: u64,
}

/// Commands that can be sent to the AggregatorActor
#[derive(Debug)]
pub enum AggregatorCommand {
    /// Run one tick immediately, outside the timer
    FlushNow {
        respond_to: oneshot::Sender<TickReport>,
    },

    GetStats {
        respond_to: oneshot::Sender<AggregatorStats>,
    },

    /// Copy of every window that has not been flushed yet
    GetOpenWindows {
        respond_to: oneshot::Sender<Vec<AggregationWindow>>,
    },

    /// Drain the queue one last time, flush every window and exit
    ///
    /// Windows that were not yet eligible are flushed marked `partial`.
    Shutdown,
}

/// Outcome of a single aggregation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Samples taken off the queue
    pub drained: usize,
    /// Samples whose window had already closed
    pub late: usize,
    pub flushed: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub samples_aggregated: u64,
    pub late_samples: u64,
    pub windows_open: usize,
    pub windows_flushed: u64,
    pub windows_discarded: u64,
    pub flush_retries: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Commands that can be sent to the ScalerActor
#[derive(Debug)]
pub enum ScalerCommand {
    /// Evaluate the load right now; the cooldown still applies
    EvaluateNow {
        respond_to: oneshot::Sender<anyhow::Result<Evaluation>>,
    },

    /// Manual resize, clamped to the policy and subject to the cooldown clock
    ScaleBy {
        delta: isize,
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    GetStats {
        respond_to: oneshot::Sender<ScalerStats>,
    },

    Shutdown,
}

/// Load observed by one scale evaluation and what was done about it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub load: f64,
    pub decision: ScaleDecision,
    pub size_before: usize,
    pub size_after: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalerStats {
    pub pool_size: usize,
    pub load: f64,
    pub queue_fill: f64,
    pub inbound_fill: f64,
    /// Samples per second per worker since the previous evaluation
    pub throughput_per_worker: f64,
    pub evaluations: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    /// Evaluations that wanted to act but were inside the cooldown
    pub cooldown_holds: u64,
    pub saturated: bool,
    pub last_action: Option<DateTime<Utc>>,
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Mute alerts for a duration
    ///
    /// Useful for maintenance windows.
    MuteAlerts { duration_secs: u64 },

    UnmuteAlerts,

    GetStats {
        respond_to: oneshot::Sender<AlertStats>,
    },

    Shutdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub received: u64,
    pub dispatched: u64,
    /// Alerts swallowed while muted
    pub suppressed: u64,
    /// Alerts missed because the actor fell behind the broadcast channel
    pub lagged: u64,
    pub muted_until: Option<DateTime<Utc>>,
}
