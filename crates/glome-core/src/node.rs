//! Per-node service registry and background task scope
//!
//! A [`Node`] owns the services one process runs and routes each inbound
//! request to the service registered for its `type`. Services are plain
//! values built by the caller, so one test process can host any number of
//! independent nodes.

use crate::{Error, Result};
use async_trait::async_trait;
use glome_protocol::{Body, Message};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long shutdown waits for background tasks to notice cancellation
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A request handler for one or more message types
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Message types routed to this service
    fn message_types(&self) -> &'static [&'static str];

    /// Handle one request and produce the reply body.
    ///
    /// Errors become `error` replies; they never stop the node.
    async fn handle(&self, request: &Message) -> Result<Body>;

    /// Spawn background work (periodic flushes, heartbeats) into `tasks`
    fn start(self: Arc<Self>, _tasks: &TaskScope) {}
}

/// Lifetime scope for a node's background tasks
///
/// Every periodic loop and gossip worker is spawned here. Shutdown cancels
/// the token and waits for the tracked tasks to finish.
#[derive(Debug, Clone, Default)]
pub struct TaskScope {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskScope {
    /// Create a new scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the node shuts down
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether shutdown has begun
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a tracked task
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Number of tracked tasks still running
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether no tracked task is running
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Cancel every task and wait up to `grace` for them to exit
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !finished {
            tracing::warn!(
                "{} background tasks still running after {:?}",
                self.tracker.len(),
                grace
            );
        }
        finished
    }
}

/// One node: its id, its services and their background tasks
pub struct Node {
    id: String,
    routes: HashMap<&'static str, Arc<dyn Service>>,
    services: Vec<Arc<dyn Service>>,
    tasks: TaskScope,
}

impl Node {
    /// Create a node with no services
    pub fn new(id: impl Into<String>, tasks: TaskScope) -> Self {
        Self {
            id: id.into(),
            routes: HashMap::new(),
            services: Vec::new(),
            tasks,
        }
    }

    /// Node id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Background task scope
    pub fn tasks(&self) -> &TaskScope {
        &self.tasks
    }

    /// Register a service for each of its message types
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<()> {
        for kind in service.message_types() {
            if let Some(existing) = self.routes.get(kind) {
                return Err(Error::config(format!(
                    "message type '{}' claimed by both {} and {}",
                    kind,
                    existing.name(),
                    service.name()
                )));
            }
        }
        for kind in service.message_types() {
            self.routes.insert(*kind, service.clone());
        }
        self.services.push(service);
        Ok(())
    }

    /// Message types this node answers
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.routes.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Start every service's background tasks
    pub fn start(&self) {
        for service in &self.services {
            tracing::debug!("Starting service {} on {}", service.name(), self.id);
            service.clone().start(&self.tasks);
        }
    }

    /// Route `request` to its service and build the reply body.
    ///
    /// The reply already carries `in_reply_to`. Failures are logged and
    /// turned into `error` bodies.
    pub async fn dispatch(&self, request: &Message) -> Body {
        let result = match self.routes.get(request.kind()) {
            Some(service) => service.handle(request).await,
            None => Err(Error::not_supported(format!(
                "no handler for message type '{}'",
                request.kind()
            ))),
        };

        let mut reply = match result {
            Ok(body) => body,
            Err(e) => {
                match &e {
                    Error::ContractViolation(_) => tracing::error!(
                        "{}: {} from {} rejected: {}",
                        self.id,
                        request.kind(),
                        request.src,
                        e
                    ),
                    _ => tracing::warn!(
                        "{}: {} from {} failed: {}",
                        self.id,
                        request.kind(),
                        request.src,
                        e
                    ),
                }
                Body::error(&e.to_rpc_error())
            }
        };
        reply.in_reply_to = request.body.msg_id;
        reply
    }

    /// Cancel background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        tracing::info!("Node {} shutting down", self.id);
        self.tasks.shutdown(SHUTDOWN_GRACE).await;
    }
}
