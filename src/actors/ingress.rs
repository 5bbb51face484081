//! IngressActor - UDP listener and load balancer
//!
//! ## Message Flow
//!
//! ```text
//! UDP datagram → decode → route(sample) → worker inbound buffer
//!     ↑
//!     └─── Commands (GetStats, Shutdown)
//! ```
//!
//! The read loop never waits on a worker: routing uses `try_send`, and a
//! sample that cannot be delivered is dropped and counted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{self, Decoded};
use crate::config::{IngressConfig, WireFormat};

use super::counters::{PipelineCounters, bump, bump_by};
use super::messages::{IngressCommand, IngressStats};
use super::router::{RouteError, SampleRouter};

pub struct IngressActor {
    socket: UdpSocket,
    local_addr: SocketAddr,
    format: WireFormat,
    max_datagram_size: usize,
    /// One byte larger than `max_datagram_size` so oversized datagrams show up
    buffer: Vec<u8>,
    router: SampleRouter,
    counters: Arc<PipelineCounters>,
    command_rx: mpsc::Receiver<IngressCommand>,
}

impl IngressActor {
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn run(mut self) {
        info!("listening for metric datagrams");

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut self.buffer) => {
                    match result {
                        Ok((len, peer)) => self.handle_datagram(len, peer),
                        // e.g. ICMP port unreachable surfaced on some platforms
                        Err(e) => warn!("failed to receive datagram: {e}"),
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        IngressCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        IngressCommand::Shutdown => {
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

        debug!("ingress actor stopped");
    }

    fn handle_datagram(&self, len: usize, peer: SocketAddr) {
        bump(&self.counters.datagrams);

        // recv_from cuts the payload silently, anything past the limit is unusable
        if len > self.max_datagram_size {
            debug!(
                "oversized datagram from {peer}, more than {} bytes",
                self.max_datagram_size
            );
            bump(&self.counters.malformed);
            return;
        }

        let Decoded { samples, malformed } = match codec::decode(self.format, &self.buffer[..len]) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("malformed datagram from {peer}: {e}");
                bump(&self.counters.malformed);
                return;
            }
        };

        if malformed > 0 {
            trace!("{malformed} malformed entries in datagram from {peer}");
            bump_by(&self.counters.malformed, malformed as u64);
        }
        bump_by(&self.counters.decoded, samples.len() as u64);

        for sample in samples {
            match self.router.route(sample) {
                Ok(worker) => {
                    trace!("routed sample to worker {worker}");
                    bump(&self.counters.routed);
                }
                Err(e @ RouteError::Saturated(_)) => {
                    trace!("dropping sample: {e}");
                    bump(&self.counters.saturated);
                }
                Err(e) => {
                    debug!("dropping sample: {e}");
                    bump(&self.counters.saturated);
                }
            }
        }
    }

    fn stats(&self) -> IngressStats {
        let snapshot = self.counters.snapshot();
        IngressStats {
            local_addr: self.local_addr,
            datagrams: snapshot.datagrams,
            decoded: snapshot.decoded,
            malformed: snapshot.malformed,
            routed: snapshot.routed,
            saturated: snapshot.saturated,
        }
    }
}

/// Handle for controlling the IngressActor
#[derive(Clone)]
pub struct IngressHandle {
    sender: mpsc::Sender<IngressCommand>,
    local_addr: SocketAddr,
}

impl IngressHandle {
    /// Bind the UDP socket and spawn the read loop
    ///
    /// A bind failure (address in use, unresolvable host) is returned to the
    /// caller; nothing is spawned in that case.
    pub async fn bind(
        config: &IngressConfig,
        router: SampleRouter,
        counters: Arc<PipelineCounters>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let socket = UdpSocket::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind UDP ingress on {}", config.bind))?;
        let local_addr = socket
            .local_addr()
            .context("failed to read UDP ingress address")?;

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = IngressActor {
            socket,
            local_addr,
            format: config.format,
            max_datagram_size: config.max_datagram_size,
            buffer: vec![0; config.max_datagram_size + 1],
            router,
            counters,
            command_rx: cmd_rx,
        };

        let task = tokio::spawn(actor.run());

        Ok((
            Self {
                sender: cmd_tx,
                local_addr,
            },
            task,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stats(&self) -> Result<IngressStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IngressCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    /// Stop reading; datagrams arriving afterwards are never decoded
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(IngressCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricSample;
    use crate::actors::router::RouteEntry;
    use chrono::Utc;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn config(format: WireFormat) -> IngressConfig {
        IngressConfig {
            bind: "127.0.0.1:0".to_string(),
            format,
            ..Default::default()
        }
    }

    async fn wait_for_datagrams(handle: &IngressHandle, count: u64) -> IngressStats {
        for _ in 0..100 {
            let stats = handle.stats().await.unwrap();
            if stats.datagrams >= count {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ingress never saw {count} datagrams");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = IngressConfig {
            bind: taken.local_addr().unwrap().to_string(),
            ..Default::default()
        };

        let result = IngressHandle::bind(
            &config,
            SampleRouter::new(),
            Arc::new(PipelineCounters::default()),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_datagrams_are_decoded_and_routed() {
        let router = SampleRouter::new();
        let (tx, mut rx) = mpsc::channel(16);
        router.insert(RouteEntry {
            id: 0,
            inbound: tx,
            processed: Arc::new(AtomicU64::new(0)),
        });

        let counters = Arc::new(PipelineCounters::default());
        let (handle, task) = IngressHandle::bind(&config(WireFormat::Json), router, counters)
            .await
            .unwrap();

        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let payload = codec::encode(
            WireFormat::Json,
            &[
                MetricSample::new("a", "cpu.load", 1.0, Utc::now()),
                MetricSample::new("b", "cpu.load", 2.0, Utc::now()),
            ],
        );
        client.send_to(&payload, handle.local_addr()).await.unwrap();
        client.send_to(b"not json", handle.local_addr()).await.unwrap();

        let stats = wait_for_datagrams(&handle, 2).await;
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.routed, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(rx.recv().await.unwrap().source, "a");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_malformed() {
        let router = SampleRouter::new();
        let (tx, mut rx) = mpsc::channel(16);
        router.insert(RouteEntry {
            id: 0,
            inbound: tx,
            processed: Arc::new(AtomicU64::new(0)),
        });

        let first = format!("agent-1 cpu.load 0.5 {}\n", Utc::now().timestamp_millis());
        let config = IngressConfig {
            max_datagram_size: first.len(),
            ..config(WireFormat::Line)
        };
        let counters = Arc::new(PipelineCounters::default());
        let (handle, task) = IngressHandle::bind(&config, router, counters).await.unwrap();

        // the limit falls right behind the first newline
        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let payload = format!("{first}agent-2 cpu.load 0.7 {}\n", Utc::now().timestamp_millis());
        client.send_to(payload.as_bytes(), handle.local_addr()).await.unwrap();
        client.send_to(first.as_bytes(), handle.local_addr()).await.unwrap();

        let stats = wait_for_datagrams(&handle, 2).await;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.routed, 1);
        assert_eq!(rx.recv().await.unwrap().source, "agent-1");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_workers_drops_without_blocking() {
        let counters = Arc::new(PipelineCounters::default());
        let (handle, task) =
            IngressHandle::bind(&config(WireFormat::Line), SampleRouter::new(), counters)
                .await
                .unwrap();

        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let line = format!("agent-1 cpu.load 0.5 {}\n", Utc::now().timestamp_millis());
        client.send_to(line.as_bytes(), handle.local_addr()).await.unwrap();

        let stats = wait_for_datagrams(&handle, 1).await;
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.routed, 0);
        assert_eq!(stats.saturated, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
