//! Broadcast service
//!
//! Answers `broadcast`, `read` and `topology` for every broadcast program,
//! plus `share` when batching. What happens to a new value depends on the
//! mode: nothing (single node), immediate flood, or queued for a batch.

use crate::batch::BatchingBroadcaster;
use crate::config::NodeConfig;
use crate::dedup::DedupSet;
use crate::flood::FloodBroadcaster;
use crate::gossip::GossipSender;
use crate::node::{Service, TaskScope};
use crate::transport::Transport;
use crate::{Error, Result};
use async_trait::async_trait;
use glome_protocol::payload::{BroadcastReadOk, BroadcastRequest, ShareRequest, TopologyRequest};
use glome_protocol::{Body, Message, kinds};
use std::sync::Arc;

/// Propagation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Record only; single-node clusters
    Local,
    /// Fan out every new client value immediately
    Flood,
    /// Gossip client values in periodic batches
    Batched,
}

enum Propagation {
    Local,
    Flood(FloodBroadcaster),
    Batched(Arc<BatchingBroadcaster>),
}

/// Service for the broadcast workload
pub struct BroadcastService {
    seen: Arc<DedupSet>,
    propagation: Propagation,
    gossip: Option<Arc<GossipSender>>,
}

impl BroadcastService {
    /// Build the service for `mode`.
    ///
    /// `Batched` with batching disabled in `config` floods instead.
    pub fn new(
        mode: BroadcastMode,
        transport: Arc<dyn Transport>,
        config: &NodeConfig,
        tasks: &TaskScope,
    ) -> Self {
        let seen = Arc::new(DedupSet::new());
        let mode = match mode {
            BroadcastMode::Batched if !config.batch.enabled => {
                tracing::info!("Batching disabled, flooding broadcasts instead");
                BroadcastMode::Flood
            }
            mode => mode,
        };

        let gossip = match mode {
            BroadcastMode::Local => None,
            BroadcastMode::Flood | BroadcastMode::Batched => Some(Arc::new(GossipSender::new(
                transport.clone(),
                config.gossip.clone(),
                tasks.clone(),
            ))),
        };

        let propagation = match (mode, &gossip) {
            (BroadcastMode::Flood, Some(gossip)) => Propagation::Flood(FloodBroadcaster::new(
                transport,
                seen.clone(),
                gossip.clone(),
            )),
            (BroadcastMode::Batched, Some(gossip)) => {
                Propagation::Batched(Arc::new(BatchingBroadcaster::new(
                    transport,
                    seen.clone(),
                    gossip.clone(),
                    &config.batch,
                )))
            }
            _ => Propagation::Local,
        };

        Self {
            seen,
            propagation,
            gossip,
        }
    }

    /// Effective mode
    pub fn mode(&self) -> BroadcastMode {
        match self.propagation {
            Propagation::Local => BroadcastMode::Local,
            Propagation::Flood(_) => BroadcastMode::Flood,
            Propagation::Batched(_) => BroadcastMode::Batched,
        }
    }

    /// Observed values
    pub fn seen(&self) -> &DedupSet {
        &self.seen
    }

    /// Gossip sender, absent in local mode
    pub fn gossip(&self) -> Option<&GossipSender> {
        self.gossip.as_deref()
    }

    fn broadcast(&self, request: &Message) -> Result<Body> {
        let BroadcastRequest { message } = request
            .body
            .decode()
            .map_err(|e| Error::malformed(format!("broadcast: {}", e)))?;

        let was_new = match &self.propagation {
            Propagation::Local => self.seen.observe(message),
            Propagation::Flood(flood) => flood.on_broadcast(&request.src, message)?,
            Propagation::Batched(batch) => batch.on_broadcast(&request.src, message),
        };
        if was_new {
            tracing::debug!("Observed {} from {}", message, request.src);
        }
        Ok(Body::new(kinds::BROADCAST_OK))
    }

    fn read(&self) -> Result<Body> {
        let messages = self.seen.snapshot();
        Ok(Body::with_payload(kinds::READ_OK, &BroadcastReadOk { messages })?)
    }

    fn topology(&self, request: &Message) -> Result<Body> {
        let topology: TopologyRequest = request
            .body
            .decode()
            .map_err(|e| Error::malformed(format!("topology: {}", e)))?;
        tracing::debug!(
            "Ignoring topology for {} nodes; every peer is a neighbor",
            topology.topology.len()
        );
        Ok(Body::new(kinds::TOPOLOGY_OK))
    }

    fn share(&self, request: &Message) -> Result<Body> {
        let Propagation::Batched(batch) = &self.propagation else {
            return Err(Error::not_supported("share outside batched broadcast"));
        };
        let share: ShareRequest = request
            .body
            .decode()
            .map_err(|e| Error::malformed(format!("share: {}", e)))?;
        let fresh = batch.on_share(&request.src, &share)?;
        tracing::debug!("Merged share from {}: {} new", request.src, fresh);
        Ok(Body::ack())
    }
}

#[async_trait]
impl Service for BroadcastService {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn message_types(&self) -> &'static [&'static str] {
        match self.propagation {
            Propagation::Batched(_) => &[kinds::BROADCAST, kinds::READ, kinds::TOPOLOGY, kinds::SHARE],
            _ => &[kinds::BROADCAST, kinds::READ, kinds::TOPOLOGY],
        }
    }

    async fn handle(&self, request: &Message) -> Result<Body> {
        match request.kind() {
            kinds::BROADCAST => self.broadcast(request),
            kinds::READ => self.read(),
            kinds::TOPOLOGY => self.topology(request),
            kinds::SHARE => self.share(request),
            other => Err(Error::not_supported(format!("broadcast service got '{}'", other))),
        }
    }

    fn start(self: Arc<Self>, tasks: &TaskScope) {
        if let Propagation::Batched(batch) = &self.propagation {
            batch.clone().spawn_flush_loop(tasks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use glome_protocol::ErrorCode;
    use serde_json::json;
    use std::time::Duration;

    struct Loopback {
        peers: Vec<String>,
    }

    #[async_trait]
    impl Transport for Loopback {
        fn node_id(&self) -> &str {
            "n1"
        }

        fn peer_ids(&self) -> &[String] {
            &self.peers
        }

        async fn send_with_timeout(&self, _: &str, _: Body, _: Duration) -> Result<Body> {
            Ok(Body::ack())
        }
    }

    fn service(mode: BroadcastMode, config: &NodeConfig) -> (Arc<BroadcastService>, TaskScope) {
        let tasks = TaskScope::new();
        let transport = Arc::new(Loopback {
            peers: vec!["n1".into(), "n2".into()],
        });
        (
            Arc::new(BroadcastService::new(mode, transport, config, &tasks)),
            tasks,
        )
    }

    fn request(src: &str, body: serde_json::Value) -> Message {
        Message::new(src, "n1", serde_json::from_value(body).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_then_read() {
        let (svc, _tasks) = service(BroadcastMode::Local, &NodeConfig::default());

        let reply = svc
            .handle(&request("c1", json!({"type": "broadcast", "msg_id": 1, "message": 5})))
            .await
            .unwrap();
        assert_eq!(reply.kind, "broadcast_ok");

        let reply = svc
            .handle(&request("c1", json!({"type": "read", "msg_id": 2})))
            .await
            .unwrap();
        assert_eq!(reply.decode::<BroadcastReadOk>().unwrap().messages, vec![5]);
    }

    #[tokio::test]
    async fn test_malformed_broadcast() {
        let (svc, _tasks) = service(BroadcastMode::Flood, &NodeConfig::default());
        let err = svc
            .handle(&request("c1", json!({"type": "broadcast", "message": "five"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_rpc_error().code, ErrorCode::MalformedRequest);
        assert!(svc.seen().is_empty());
    }

    #[tokio::test]
    async fn test_topology_acknowledged() {
        let (svc, _tasks) = service(BroadcastMode::Flood, &NodeConfig::default());
        let reply = svc
            .handle(&request(
                "c1",
                json!({"type": "topology", "topology": {"n1": ["n2"], "n2": ["n1"]}}),
            ))
            .await
            .unwrap();
        assert_eq!(reply.kind, "topology_ok");
    }

    #[tokio::test]
    async fn test_share_only_in_batched_mode() {
        let (flood, _t1) = service(BroadcastMode::Flood, &NodeConfig::default());
        assert!(!flood.message_types().contains(&kinds::SHARE));

        let (batched, _t2) = service(BroadcastMode::Batched, &NodeConfig::default());
        assert!(batched.message_types().contains(&kinds::SHARE));

        let reply = batched
            .handle(&request("n2", json!({"type": "share", "msg_id": 4, "messages": [1, 2]})))
            .await
            .unwrap();
        assert_eq!(reply, Body::ack());
        assert_eq!(batched.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_share_rejected() {
        let (svc, _tasks) = service(BroadcastMode::Batched, &NodeConfig::default());
        let err = svc
            .handle(&request(
                "n2",
                json!({"type": "share", "message": 1, "messages": [2]}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert!(svc.seen().is_empty());
    }

    #[test]
    fn test_disabled_batching_floods() {
        let mut config = NodeConfig::default();
        config.batch.enabled = false;
        let (svc, _tasks) = service(BroadcastMode::Batched, &config);
        assert_eq!(svc.mode(), BroadcastMode::Flood);
        assert!(svc.gossip().is_some());

        let (local, _tasks) = service(BroadcastMode::Local, &NodeConfig::default());
        assert!(local.gossip().is_none());
    }
}
