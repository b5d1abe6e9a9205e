//! Flood broadcast
//!
//! A value new to this node that came from a client is re-sent to every other
//! peer straight away. Values arriving from peers are only recorded, so each
//! value crosses the cluster in one hop from its origin.

use crate::dedup::DedupSet;
use crate::gossip::GossipSender;
use crate::transport::Transport;
use crate::Result;
use glome_protocol::payload::BroadcastRequest;
use glome_protocol::{Body, kinds};
use std::sync::Arc;

/// Dedup-then-fan-out broadcaster
pub struct FloodBroadcaster {
    transport: Arc<dyn Transport>,
    seen: Arc<DedupSet>,
    gossip: Arc<GossipSender>,
}

impl FloodBroadcaster {
    /// Broadcaster recording into `seen` and fanning out through `gossip`
    pub fn new(transport: Arc<dyn Transport>, seen: Arc<DedupSet>, gossip: Arc<GossipSender>) -> Self {
        Self {
            transport,
            seen,
            gossip,
        }
    }

    /// Record `value` received from `src`; fan out if it is new and `src` is
    /// a client. Returns whether the value was new.
    pub fn on_broadcast(&self, src: &str, value: i64) -> Result<bool> {
        let was_new = self.seen.observe(value);
        if !was_new || self.transport.is_peer(src) {
            return Ok(was_new);
        }

        let targets = self.transport.fan_out_targets(Some(src));
        tracing::debug!("Flooding {} to {} peers", value, targets.len());
        let payload = Body::with_payload(kinds::BROADCAST, &BroadcastRequest { message: value })?;
        self.gossip.deliver_all(&targets, &payload);
        Ok(true)
    }

    /// Observed values
    pub fn seen(&self) -> &DedupSet {
        &self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GossipConfig;
    use crate::node::TaskScope;
    use crate::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder {
        peers: Vec<String>,
        sent: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn node_id(&self) -> &str {
            "n1"
        }

        fn peer_ids(&self) -> &[String] {
            &self.peers
        }

        async fn send_with_timeout(&self, dest: &str, body: Body, _: Duration) -> Result<Body> {
            let request: BroadcastRequest = body.decode().map_err(Error::from)?;
            self.sent.lock().push((dest.to_string(), request.message));
            Ok(Body::new(kinds::BROADCAST_OK))
        }
    }

    fn setup() -> (FloodBroadcaster, Arc<Recorder>, TaskScope) {
        let transport = Arc::new(Recorder {
            peers: vec!["n1".into(), "n2".into(), "n3".into()],
            sent: Mutex::new(Vec::new()),
        });
        let tasks = TaskScope::new();
        let gossip = Arc::new(GossipSender::new(
            transport.clone(),
            GossipConfig::default(),
            tasks.clone(),
        ));
        let flood = FloodBroadcaster::new(transport.clone(), Arc::new(DedupSet::new()), gossip);
        (flood, transport, tasks)
    }

    async fn settle(flood: &FloodBroadcaster) {
        for _ in 0..100 {
            if flood.gossip.stats().backlog() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_client_value_fans_out_to_other_peers() {
        let (flood, transport, tasks) = setup();

        assert!(flood.on_broadcast("c1", 5).unwrap());
        settle(&flood).await;

        let mut sent = transport.sent.lock().clone();
        sent.sort();
        assert_eq!(sent, vec![("n2".to_string(), 5), ("n3".to_string(), 5)]);
        tasks.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_duplicate_and_peer_values_are_not_forwarded() {
        let (flood, transport, tasks) = setup();

        assert!(flood.on_broadcast("c1", 5).unwrap());
        assert!(!flood.on_broadcast("c2", 5).unwrap());
        assert!(flood.on_broadcast("n2", 6).unwrap());
        settle(&flood).await;

        assert_eq!(transport.sent.lock().len(), 2);
        assert!(flood.seen().contains(6));
        assert_eq!(flood.gossip.stats().enqueued, 2);
        tasks.shutdown(Duration::from_secs(1)).await;
    }
}
