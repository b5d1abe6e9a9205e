//! Gossip sender
//!
//! `deliver(peer, payload)` never blocks and never fails from the caller's
//! point of view: the payload is queued on the peer's outbox and a worker
//! keeps resending it until the peer acknowledges.
//!
//! # Resource bounds
//!
//! ```text
//! deliver ──► outbox(peer) ──► worker(peer) ──► ≤ max_in_flight sends ──► peer
//!                                                   │ failure
//!                                                   └─► backoff, resend
//! ```
//!
//! One worker per peer, at most `max_in_flight_per_peer` concurrent sends per
//! peer, exponential backoff between attempts. An unreachable peer grows its
//! queue of payloads but not the number of tasks.

use crate::config::GossipConfig;
use crate::node::TaskScope;
use crate::retry::RetryContext;
use crate::transport::Transport;
use crate::Error;
use dashmap::DashMap;
use glome_protocol::Body;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, mpsc};

/// Gossip sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipStats {
    /// Payloads accepted by `deliver`
    pub enqueued: u64,
    /// Payloads acknowledged by their peer
    pub delivered: u64,
    /// Failed attempts that were retried
    pub retries: u64,
    /// Payloads abandoned (attempt limit reached, definite rejection)
    pub dropped: u64,
}

impl GossipStats {
    /// Payloads neither delivered nor dropped yet
    pub fn backlog(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered)
            .saturating_sub(self.dropped)
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    retries: AtomicU64,
    dropped: AtomicU64,
}

/// Reliable, fire-and-forget delivery to individual peers
pub struct GossipSender {
    transport: Arc<dyn Transport>,
    config: GossipConfig,
    tasks: TaskScope,
    outboxes: DashMap<String, mpsc::UnboundedSender<Body>>,
    counters: Arc<Counters>,
}

impl GossipSender {
    /// Create a sender whose workers live in `tasks`
    pub fn new(transport: Arc<dyn Transport>, config: GossipConfig, tasks: TaskScope) -> Self {
        Self {
            transport,
            config,
            tasks,
            outboxes: DashMap::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Queue `payload` for `peer`; returns immediately
    pub fn deliver(&self, peer: &str, payload: Body) {
        if self.tasks.is_cancelled() {
            tracing::debug!("Dropping gossip to {} during shutdown", peer);
            return;
        }

        let outbox = self
            .outboxes
            .entry(peer.to_string())
            .or_insert_with(|| self.spawn_worker(peer))
            .clone();

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if outbox.send(payload).is_err() {
            // Worker already exited on shutdown
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Queue `payload` for every peer in `peers`
    pub fn deliver_all(&self, peers: &[String], payload: &Body) {
        for peer in peers {
            self.deliver(peer, payload.clone());
        }
    }

    /// Get statistics
    pub fn stats(&self) -> GossipStats {
        GossipStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn spawn_worker(&self, peer: &str) -> mpsc::UnboundedSender<Body> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = OutboxWorker {
            peer: peer.to_string(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            tasks: self.tasks.clone(),
            counters: self.counters.clone(),
        };
        tracing::debug!("Starting gossip outbox for {}", peer);
        self.tasks.spawn(worker.run(rx));
        tx
    }
}

struct OutboxWorker {
    peer: String,
    transport: Arc<dyn Transport>,
    config: GossipConfig,
    tasks: TaskScope,
    counters: Arc<Counters>,
}

impl OutboxWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Body>) {
        let cancel = self.tasks.token();
        let in_flight = Arc::new(Semaphore::new(self.config.max_in_flight_per_peer));
        let this = Arc::new(self);

        loop {
            let payload = tokio::select! {
                next = rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let permit = tokio::select! {
                permit = in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };

            let worker = this.clone();
            this.tasks.spawn(async move {
                worker.send_until_acked(payload).await;
                drop(permit);
            });
        }

        tracing::debug!("Gossip outbox for {} stopped", this.peer);
    }

    async fn send_until_acked(&self, payload: Body) {
        let cancel = self.tasks.token();
        let timeout = self.config.rpc_timeout();
        let mut ctx = RetryContext::new(self.config.retry.clone());

        let result = ctx
            .run(&cancel, || {
                let payload = payload.clone();
                async move {
                    let result = self
                        .transport
                        .send_with_timeout(&self.peer, payload, timeout)
                        .await;
                    if let Err(e) = &result {
                        tracing::debug!("Failed to send to neighbor {}: {}", self.peer, e);
                    }
                    result
                }
            })
            .await;

        let stats = ctx.stats();
        let retried = u64::from(stats.total_attempts.saturating_sub(1));
        self.counters.retries.fetch_add(retried, Ordering::Relaxed);

        match result {
            Ok(_) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                if retried > 0 {
                    tracing::info!(
                        "Gossip to {} delivered after {} attempts ({:?})",
                        self.peer,
                        stats.total_attempts,
                        stats.total_retry_time
                    );
                }
            }
            Err(Error::Shutdown) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Gossip to {} abandoned on shutdown", self.peer);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Gossip to {} dropped after {} attempts: {}",
                    self.peer,
                    stats.total_attempts,
                    e
                );
            }
        }
    }
}
