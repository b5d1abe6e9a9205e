//! Batched gossip
//!
//! Client broadcasts are recorded and queued; a periodic tick sends the queue
//! to every peer as one `share`. Received shares are merged without being
//! forwarded again.

use crate::config::BatchConfig;
use crate::dedup::DedupSet;
use crate::gossip::GossipSender;
use crate::node::TaskScope;
use crate::transport::Transport;
use crate::{Error, Result};
use glome_protocol::payload::{ShareRequest, ShareShape};
use glome_protocol::{Body, kinds};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// When a pending batch is worth sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Size that flushes on the next tick
    pub min_batch: usize,
    /// Longest a smaller batch waits
    pub debounce: Duration,
}

impl FlushPolicy {
    /// Policy from the batch section of the node config
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            min_batch: config.min_batch,
            debounce: config.debounce(),
        }
    }

    /// Whether `len` values, `elapsed` after the previous flush, should go now
    pub fn should_flush(&self, len: usize, elapsed: Duration) -> bool {
        if len == 0 {
            return false;
        }
        len >= self.min_batch || elapsed >= self.debounce
    }
}

#[derive(Debug)]
struct Pending {
    values: Vec<i64>,
    last_flush: Instant,
}

/// Values waiting for the next flush, in arrival order
#[derive(Debug)]
pub struct PendingBatch {
    inner: Mutex<Pending>,
}

impl Default for PendingBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingBatch {
    /// Empty batch; the debounce clock starts now
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Pending {
                values: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    /// Append `value` to the batch
    pub fn push(&self, value: i64) {
        self.inner.lock().values.push(value);
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }

    /// Swap out the batch if `policy` says it is due.
    ///
    /// Taking the batch resets the debounce anchor.
    pub fn take_due(&self, policy: &FlushPolicy) -> Option<Vec<i64>> {
        let mut pending = self.inner.lock();
        let now = Instant::now();
        if !policy.should_flush(pending.values.len(), now - pending.last_flush) {
            return None;
        }
        pending.last_flush = now;
        Some(std::mem::take(&mut pending.values))
    }
}

/// Broadcaster that gossips client values in periodic batches
pub struct BatchingBroadcaster {
    transport: Arc<dyn Transport>,
    seen: Arc<DedupSet>,
    gossip: Arc<GossipSender>,
    pending: PendingBatch,
    policy: FlushPolicy,
    tick: Duration,
}

impl BatchingBroadcaster {
    /// Broadcaster recording into `seen` and flushing through `gossip`
    pub fn new(
        transport: Arc<dyn Transport>,
        seen: Arc<DedupSet>,
        gossip: Arc<GossipSender>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            transport,
            seen,
            gossip,
            pending: PendingBatch::new(),
            policy: FlushPolicy::new(config),
            tick: config.tick(),
        }
    }

    /// Record `value` from `src`; queue it when it is new and from a client.
    /// Returns whether the value was new.
    pub fn on_broadcast(&self, src: &str, value: i64) -> bool {
        let was_new = self.seen.observe(value);
        if was_new && !self.transport.is_peer(src) {
            self.pending.push(value);
        }
        was_new
    }

    /// Merge a peer's share; returns how many values were new.
    ///
    /// A share carrying both shapes breaks the peer contract and mutates
    /// nothing.
    pub fn on_share(&self, src: &str, share: &ShareRequest) -> Result<usize> {
        let values = share.values().map_err(|shape| match shape {
            ShareShape::Ambiguous => Error::contract(format!(
                "share from {} carries both message and messages",
                src
            )),
            ShareShape::Empty => {
                Error::malformed(format!("share from {} carries no values", src))
            }
        })?;
        Ok(self.seen.extend(values))
    }

    /// Send the pending batch if the flush policy allows; returns the number
    /// of values sent.
    pub fn flush_due(&self) -> Result<usize> {
        let Some(values) = self.pending.take_due(&self.policy) else {
            return Ok(0);
        };

        let targets = self.transport.fan_out_targets(None);
        let count = values.len();
        tracing::debug!("Flushing {} values to {} peers", count, targets.len());
        let payload = Body::with_payload(kinds::SHARE, &ShareRequest::batch(values))?;
        self.gossip.deliver_all(&targets, &payload);
        Ok(count)
    }

    /// Values waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Observed values
    pub fn seen(&self) -> &DedupSet {
        &self.seen
    }

    /// Spawn the periodic flush into `tasks`
    pub fn spawn_flush_loop(self: Arc<Self>, tasks: &TaskScope) {
        let cancel = tasks.token();
        tasks.spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.flush_due() {
                            tracing::error!("Batch flush failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("Batch flush loop stopped");
        });
    }
}
