//! In-process cluster for tests
//!
//! [`SimNetwork`] routes requests between nodes and store services living in
//! the same process. Links can be cut per node and requests can be delivered
//! twice, which is enough to exercise the at-least-once contract without
//! sockets or child processes.

use crate::config::NodeConfig;
use crate::kv::{KvStore, MemoryKv};
use crate::node::{Node, TaskScope};
use crate::program::Program;
use crate::transport::{Transport, into_result};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use glome_protocol::payload::{KvCas, KvRead, KvReadOk, KvWrite};
use glome_protocol::{Body, Message, kinds};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Clone)]
enum Endpoint {
    Node(Arc<Node>),
    Store(Arc<MemoryKv>),
}

struct Inner {
    node_ids: Vec<String>,
    endpoints: DashMap<String, Endpoint>,
    isolated: DashSet<String>,
    duplicate: AtomicBool,
    latency: Mutex<Duration>,
    next_msg_id: AtomicU64,
    delivered: AtomicU64,
}

/// Simulated cluster network
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<Inner>,
}

impl SimNetwork {
    /// Create a network whose cluster consists of `node_ids`
    pub fn new(node_ids: &[&str]) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_ids: node_ids.iter().map(|id| id.to_string()).collect(),
                endpoints: DashMap::new(),
                isolated: DashSet::new(),
                duplicate: AtomicBool::new(false),
                latency: Mutex::new(Duration::ZERO),
                next_msg_id: AtomicU64::new(1),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Cluster node ids
    pub fn node_ids(&self) -> &[String] {
        &self.inner.node_ids
    }

    /// Transport as seen from `node_id`
    pub fn transport(&self, node_id: &str) -> Arc<dyn Transport> {
        Arc::new(SimTransport {
            id: node_id.to_string(),
            inner: self.inner.clone(),
        })
    }

    /// Build, register and start `program` on `node_id`
    pub fn spawn_node(&self, node_id: &str, program: Program, config: &NodeConfig) -> Result<Arc<Node>> {
        let node = Arc::new(program.build(self.transport(node_id), config, TaskScope::new())?);
        self.inner
            .endpoints
            .insert(node_id.to_string(), Endpoint::Node(node.clone()));
        node.start();
        Ok(node)
    }

    /// Start `program` on every cluster node
    pub fn spawn_cluster(&self, program: Program, config: &NodeConfig) -> Result<Vec<Arc<Node>>> {
        self.inner
            .node_ids
            .iter()
            .map(|id| self.spawn_node(id, program, config))
            .collect()
    }

    /// Register an in-memory store service under `service`
    pub fn add_store(&self, service: &str) -> Arc<MemoryKv> {
        let store = Arc::new(MemoryKv::new());
        self.inner
            .endpoints
            .insert(service.to_string(), Endpoint::Store(store.clone()));
        store
    }

    /// Drop all traffic to and from `node_id`
    pub fn isolate(&self, node_id: &str) {
        tracing::debug!("Isolating {}", node_id);
        self.inner.isolated.insert(node_id.to_string());
    }

    /// Reconnect `node_id`
    pub fn heal(&self, node_id: &str) {
        tracing::debug!("Healing {}", node_id);
        self.inner.isolated.remove(node_id);
    }

    /// Deliver every node-to-node request twice
    pub fn set_duplicate(&self, duplicate: bool) {
        self.inner.duplicate.store(duplicate, Ordering::SeqCst);
    }

    /// Delay before every delivery
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Requests delivered so far, duplicates included
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Send a client request to `dest` and return the raw reply body.
    ///
    /// Client links are never cut. Error replies come back as bodies.
    pub async fn request(&self, client: &str, dest: &str, mut body: Body) -> Result<Body> {
        body.msg_id = Some(self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed));
        let endpoint = self.inner.endpoint(dest)?;
        Ok(self
            .inner
            .deliver(&endpoint, Message::new(client, dest, body))
            .await)
    }

    /// Shut every node down
    pub async fn shutdown(&self) {
        let nodes: Vec<_> = self
            .inner
            .endpoints
            .iter()
            .filter_map(|entry| match entry.value() {
                Endpoint::Node(node) => Some(node.clone()),
                Endpoint::Store(_) => None,
            })
            .collect();
        for node in nodes {
            node.shutdown().await;
        }
    }
}

impl Inner {
    fn endpoint(&self, id: &str) -> Result<Endpoint> {
        self.endpoints
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownPeer(id.to_string()))
    }

    fn is_cut(&self, src: &str, dest: &str) -> bool {
        self.isolated.contains(src) || self.isolated.contains(dest)
    }

    async fn deliver(&self, endpoint: &Endpoint, message: Message) -> Body {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let mut reply = match endpoint {
            Endpoint::Node(node) => node.dispatch(&message).await,
            Endpoint::Store(store) => match store_reply(store, &message).await {
                Ok(body) => body,
                Err(e) => Body::error(&e.to_rpc_error()),
            },
        };
        reply.in_reply_to = message.body.msg_id;
        reply
    }
}

/// Answer a store request the way the key/value services do
async fn store_reply(store: &MemoryKv, request: &Message) -> Result<Body> {
    let timeout = Duration::ZERO;
    match request.kind() {
        kinds::READ => {
            let KvRead { key } = request.body.decode()?;
            let value = store.read_int(&key, timeout).await?;
            Ok(Body::with_payload(kinds::READ_OK, &KvReadOk { value })?)
        }
        kinds::WRITE => {
            let KvWrite { key, value } = request.body.decode()?;
            store.put(&key, value);
            Ok(Body::new(kinds::WRITE_OK))
        }
        kinds::CAS => {
            let cas: KvCas = request.body.decode()?;
            store
                .compare_and_swap(&cas.key, cas.from, cas.to, cas.create_if_not_exists, timeout)
                .await?;
            Ok(Body::new(kinds::CAS_OK))
        }
        other => Err(Error::not_supported(format!("store got '{}'", other))),
    }
}

/// One node's view of a [`SimNetwork`]
pub struct SimTransport {
    id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl Transport for SimTransport {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn peer_ids(&self) -> &[String] {
        &self.inner.node_ids
    }

    async fn send_with_timeout(&self, dest: &str, mut body: Body, timeout: Duration) -> Result<Body> {
        body.msg_id = Some(self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed));
        let endpoint = self.inner.endpoint(dest)?;

        if self.inner.is_cut(&self.id, dest) {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout(timeout));
        }

        let message = Message::new(self.id.as_str(), dest, body);
        let reply = match tokio::time::timeout(timeout, self.inner.deliver(&endpoint, message.clone())).await {
            Ok(reply) => reply,
            Err(_) => return Err(Error::Timeout(timeout)),
        };

        if self.inner.duplicate.load(Ordering::SeqCst) {
            let _ = self.inner.deliver(&endpoint, message).await;
        }

        into_result(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glome_protocol::ErrorCode;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Body {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_store_service_semantics() {
        let net = SimNetwork::new(&["n1"]);
        let store = net.add_store("seq-kv");
        let t = net.transport("n1");
        let timeout = Duration::from_millis(100);

        let err = t
            .send_with_timeout("seq-kv", body(json!({"type": "read", "key": "counter"})), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rpc(ref e) if e.code == ErrorCode::KeyDoesNotExist));

        t.send_with_timeout(
            "seq-kv",
            body(json!({"type": "cas", "key": "counter", "from": 0, "to": 2, "create_if_not_exists": true})),
            timeout,
        )
        .await
        .unwrap();
        assert_eq!(store.get("counter"), Some(2));

        let err = t
            .send_with_timeout(
                "seq-kv",
                body(json!({"type": "cas", "key": "counter", "from": 0, "to": 5})),
                timeout,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rpc(ref e) if e.code == ErrorCode::PreconditionFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_node_times_out() {
        let net = SimNetwork::new(&["n1", "n2"]);
        net.spawn_node("n2", Program::Echo, &NodeConfig::default()).unwrap();
        let t = net.transport("n1");
        let timeout = Duration::from_millis(100);

        net.isolate("n2");
        assert!(matches!(
            t.send_with_timeout("n2", Body::new("echo"), timeout).await,
            Err(Error::Timeout(_))
        ));

        net.heal("n2");
        let reply = t.send_with_timeout("n2", Body::new("echo"), timeout).await.unwrap();
        assert_eq!(reply.kind, "echo_ok");
        assert!(reply.in_reply_to.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_delivery() {
        let net = SimNetwork::new(&["n1", "n2"]);
        net.spawn_node("n2", Program::Echo, &NodeConfig::default()).unwrap();
        net.set_duplicate(true);

        net.transport("n1")
            .send_with_timeout("n2", Body::new("echo"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(net.delivered(), 2);
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let net = SimNetwork::new(&["n1"]);
        assert!(matches!(
            net.request("c1", "n9", Body::new("read")).await,
            Err(Error::UnknownPeer(_))
        ));
    }
}
