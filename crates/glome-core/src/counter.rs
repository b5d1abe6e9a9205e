//! Grow-only counter
//!
//! Each node keeps increments it has not merged yet (`pending_delta`) and the
//! highest global value it has seen in the store (`cached_global`). Merging is
//! an optimistic compare-and-swap from the cached value; a lost race leaves
//! the increments pending for the next attempt.
//!
//! ```text
//! add(d) ──► try_read ──► pending += d ──► CAS(cached → cached + pending)
//!                                              │ ok:  pending -= snap
//!                                              │      cached  += snap
//!                                              └ mismatch: keep pending
//! ```
//!
//! The node reports `pending_delta + cached_global`.

use crate::config::CounterConfig;
use crate::kv::KvStore;
use crate::node::{Service, TaskScope};
use crate::{Error, Result};
use async_trait::async_trait;
use glome_protocol::payload::{AddRequest, CounterReadOk};
use glome_protocol::{Body, Message, kinds};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Local view of the counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterState {
    /// Increments applied here but not yet merged into the store
    pub pending_delta: i64,
    /// Highest store value observed; never decreases
    pub cached_global: i64,
}

impl CounterState {
    /// Value this node reports
    pub fn value(&self) -> i64 {
        self.pending_delta.saturating_add(self.cached_global)
    }
}

/// Reconciliation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterStats {
    /// Merges the store accepted
    pub cas_successes: u64,
    /// Merges lost to a concurrent writer
    pub cas_conflicts: u64,
    /// Merges that failed for any other reason
    pub cas_failures: u64,
    /// Store reads that failed (a missing key is not a failure)
    pub read_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cas_successes: AtomicU64,
    cas_conflicts: AtomicU64,
    cas_failures: AtomicU64,
    read_failures: AtomicU64,
}

/// Merges local increments into the shared store
pub struct CounterReconciler {
    store: Arc<dyn KvStore>,
    key: String,
    timeout: Duration,
    state: Mutex<CounterState>,
    // Serializes read-then-swap rounds. Two rounds swapping from the same
    // basis with overlapping snapshots would merge the overlap twice.
    reconcile: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl CounterReconciler {
    /// Reconciler for `config.key` in `store`, starting from zero
    pub fn new(store: Arc<dyn KvStore>, config: &CounterConfig) -> Self {
        Self {
            store,
            key: config.key.clone(),
            timeout: config.rpc_timeout(),
            state: Mutex::new(CounterState::default()),
            reconcile: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Current local state
    pub fn state(&self) -> CounterState {
        *self.state.lock()
    }

    /// Get statistics
    pub fn stats(&self) -> CounterStats {
        CounterStats {
            cas_successes: self.counters.cas_successes.load(Ordering::Relaxed),
            cas_conflicts: self.counters.cas_conflicts.load(Ordering::Relaxed),
            cas_failures: self.counters.cas_failures.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
        }
    }

    /// Raise `cached_global` to `observed` if larger; returns the cached value
    pub fn merge_observed(&self, observed: i64) -> i64 {
        let mut state = self.state.lock();
        state.cached_global = state.cached_global.max(observed);
        state.cached_global
    }

    /// Refresh the cache from the store. An absent key reads as zero; other
    /// failures keep the stale cache.
    pub async fn try_read(&self) {
        match self.store.read_int(&self.key, self.timeout).await {
            Ok(observed) => {
                self.merge_observed(observed);
            }
            Err(Error::KeyNotFound(_)) => {}
            Err(e) => {
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Reading {} failed: {}", self.key, e);
            }
        }
    }

    /// Apply `delta` locally and try to merge everything pending.
    ///
    /// A negative delta, or one that would overflow the counter, is an
    /// error. Store failures leave the delta pending for the next round.
    pub async fn add(&self, delta: i64) -> Result<()> {
        if delta < 0 {
            return Err(Error::malformed(format!(
                "counter only grows, got delta {}",
                delta
            )));
        }

        let _round = self.reconcile.lock().await;
        self.try_read().await;

        let (snapshot, target) = {
            let mut state = self.state.lock();
            let overflow = || Error::malformed(format!("counter overflows adding {}", delta));
            let pending = state.pending_delta.checked_add(delta).ok_or_else(overflow)?;
            let target = state.cached_global.checked_add(pending).ok_or_else(overflow)?;
            state.pending_delta = pending;
            (*state, target)
        };
        if snapshot.pending_delta == 0 {
            return Ok(());
        }

        let basis = snapshot.cached_global;
        match self
            .store
            .compare_and_swap(&self.key, basis, target, true, self.timeout)
            .await
        {
            Ok(()) => {
                let mut state = self.state.lock();
                state.pending_delta -= snapshot.pending_delta;
                state.cached_global = state.cached_global.max(target);
                self.counters.cas_successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::CasMismatch { .. }) => {
                self.counters.cas_conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "CAS {} -> {} on {} lost, {} stays pending",
                    basis,
                    target,
                    self.key,
                    snapshot.pending_delta
                );
            }
            Err(e) => {
                self.counters.cas_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("CAS on {} failed: {}", self.key, e);
            }
        }
        Ok(())
    }

    /// Refresh the cache and report the counter value
    pub async fn read(&self) -> i64 {
        let _round = self.reconcile.lock().await;
        self.try_read().await;
        self.state().value()
    }
}

/// Service for the counter workload
pub struct CounterService {
    reconciler: Arc<CounterReconciler>,
    heartbeat: Duration,
}

impl CounterService {
    /// Counter backed by `store`, merged every `config.heartbeat()`
    pub fn new(store: Arc<dyn KvStore>, config: &CounterConfig) -> Self {
        Self {
            reconciler: Arc::new(CounterReconciler::new(store, config)),
            heartbeat: config.heartbeat(),
        }
    }

    /// Reconciler shared with the heartbeat
    pub fn reconciler(&self) -> &CounterReconciler {
        &self.reconciler
    }
}

#[async_trait]
impl Service for CounterService {
    fn name(&self) -> &'static str {
        "g-counter"
    }

    fn message_types(&self) -> &'static [&'static str] {
        &[kinds::ADD, kinds::READ]
    }

    async fn handle(&self, request: &Message) -> Result<Body> {
        match request.kind() {
            kinds::ADD => {
                let AddRequest { delta } = request
                    .body
                    .decode()
                    .map_err(|e| Error::malformed(format!("add: {}", e)))?;
                self.reconciler.add(delta).await?;
                Ok(Body::new(kinds::ADD_OK))
            }
            kinds::READ => {
                let value = self.reconciler.read().await;
                Ok(Body::with_payload(kinds::READ_OK, &CounterReadOk { value })?)
            }
            other => Err(Error::not_supported(format!("counter service got '{}'", other))),
        }
    }

    fn start(self: Arc<Self>, tasks: &TaskScope) {
        let reconciler = self.reconciler.clone();
        let period = self.heartbeat;
        let cancel = tasks.token();
        tasks.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = reconciler.add(0).await {
                            tracing::warn!("Counter heartbeat failed: {}", e);
                        }
                        let state = reconciler.state();
                        tracing::debug!(
                            "Counter state: cached {} pending {}",
                            state.cached_global,
                            state.pending_delta
                        );
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("Counter heartbeat stopped");
        });
    }
}
