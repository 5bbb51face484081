//! AlertActor - Forwards collector alerts to notification handlers
//!
//! ## Message Flow
//!
//! ```text
//! Aggregator / Scaler → broadcast CollectorAlert → AlertActor → NotificationRegistry::dispatch
//!                                                      ↑
//!                                                      └─── Commands (Mute, Unmute, GetStats, Shutdown)
//! ```
//!
//! While muted, alerts are received and counted but not dispatched. A mute
//! expires on its own once its duration has elapsed.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::notify::NotificationRegistry;

use super::messages::{AlertCommand, AlertStats, CollectorAlert};

pub struct AlertActor {
    registry: Arc<NotificationRegistry>,
    command_rx: mpsc::Receiver<AlertCommand>,
    alert_rx: broadcast::Receiver<CollectorAlert>,
    muted_until: Option<DateTime<Utc>>,
    stats: AlertStats,
}

impl AlertActor {
    pub fn new(
        registry: Arc<NotificationRegistry>,
        command_rx: mpsc::Receiver<AlertCommand>,
        alert_rx: broadcast::Receiver<CollectorAlert>,
    ) -> Self {
        Self {
            registry,
            command_rx,
            alert_rx,
            muted_until: None,
            stats: AlertStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        loop {
            tokio::select! {
                result = self.alert_rx.recv() => {
                    match result {
                        Ok(alert) => self.handle_alert(alert).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} alerts");
                            self.stats.lagged += skipped;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("alert channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::MuteAlerts { duration_secs } => {
                            debug!("muting alerts for {duration_secs}s");
                            self.muted_until = Some(mute_deadline(Utc::now(), duration_secs));
                        }

                        AlertCommand::UnmuteAlerts => {
                            debug!("unmuting alerts");
                            self.muted_until = None;
                        }

                        AlertCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        AlertCommand::Shutdown => {
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

        debug!("alert actor stopped");
    }

    async fn handle_alert(&mut self, alert: CollectorAlert) {
        self.stats.received += 1;

        if self.is_muted(Utc::now()) {
            trace!("alerts muted, suppressing '{}'", alert.kind.title());
            self.stats.suppressed += 1;
            return;
        }

        info!("{}: {}", alert.kind.title(), alert.kind);
        let delivered = self.registry.dispatch(&alert).await;
        self.stats.dispatched += delivered as u64;
    }

    fn is_muted(&mut self, now: DateTime<Utc>) -> bool {
        match self.muted_until {
            Some(until) if now < until => true,
            Some(_) => {
                debug!("mute expired");
                self.muted_until = None;
                false
            }
            None => false,
        }
    }

    fn stats(&self) -> AlertStats {
        AlertStats {
            muted_until: self.muted_until,
            ..self.stats.clone()
        }
    }
}

/// End of a mute starting at `now`; spans past the calendar saturate at its end
fn mute_deadline(now: DateTime<Utc>, duration_secs: u64) -> DateTime<Utc> {
    i64::try_from(duration_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|duration| now.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    pub fn spawn(
        registry: Arc<NotificationRegistry>,
        alert_rx: broadcast::Receiver<CollectorAlert>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AlertActor::new(registry, cmd_rx, alert_rx);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    /// Mute alerts for a duration
    pub async fn mute_alerts(&self, duration_secs: u64) -> Result<()> {
        self.sender
            .send(AlertCommand::MuteAlerts { duration_secs })
            .await
            .context("failed to send MuteAlerts command")
    }

    pub async fn unmute_alerts(&self) -> Result<()> {
        self.sender
            .send(AlertCommand::UnmuteAlerts)
            .await
            .context("failed to send UnmuteAlerts command")
    }

    pub async fn stats(&self) -> Result<AlertStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AlertCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
