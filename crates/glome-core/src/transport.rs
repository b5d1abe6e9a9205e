//! Transport seam
//!
//! The core never touches stdin/stdout or sockets. It talks to peers and to
//! the key/value service through [`Transport`], which the binary implements
//! over the stdio runtime and tests implement over an in-process network.
//!
//! # Delivery contract
//!
//! Delivery is at-least-once and unordered. A request may be delivered more
//! than once (retries, duplicated packets), late, or after a later request.
//! Everything built on this trait must stay correct under that contract by
//! construction: set-union merges, compare-and-swap basis checks.

use crate::{Error, Result};
use async_trait::async_trait;
use glome_protocol::Body;
use std::time::Duration;

/// Request/response transport between nodes
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's id
    fn node_id(&self) -> &str;

    /// Every node in the cluster, including this one
    fn peer_ids(&self) -> &[String];

    /// Send `body` to `dest` and wait up to `timeout` for the reply.
    ///
    /// The transport assigns `msg_id`. An `error` reply is returned as
    /// [`Error::Rpc`]; no reply in time is [`Error::Timeout`].
    async fn send_with_timeout(&self, dest: &str, body: Body, timeout: Duration) -> Result<Body>;

    /// Whether `id` names a cluster node (as opposed to a client or service)
    fn is_peer(&self, id: &str) -> bool {
        self.peer_ids().iter().any(|peer| peer == id)
    }

    /// Peers other than this node and `exclude`
    fn fan_out_targets(&self, exclude: Option<&str>) -> Vec<String> {
        let me = self.node_id();
        self.peer_ids()
            .iter()
            .filter(|peer| peer.as_str() != me && Some(peer.as_str()) != exclude)
            .cloned()
            .collect()
    }
}

/// Turn a reply body into a result, surfacing `error` bodies as [`Error::Rpc`]
pub fn into_result(reply: Body) -> Result<Body> {
    if reply.is_error() {
        return match reply.rpc_error() {
            Some(remote) => Err(Error::Rpc(remote)),
            None => Err(Error::malformed("error reply without code")),
        };
    }
    Ok(reply)
}
