//! Program selection
//!
//! A program is the set of services one node process runs. The binary picks
//! it from the command line; tests pick it per simulated node.

use crate::broadcast::{BroadcastMode, BroadcastService};
use crate::config::NodeConfig;
use crate::counter::CounterService;
use crate::echo::EchoService;
use crate::kv::RemoteKv;
use crate::node::{Node, TaskScope};
use crate::transport::Transport;
use crate::unique_id::UniqueIdService;
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Workload a node serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Echo,
    UniqueIds,
    /// Broadcast on a single node, no gossip
    BroadcastSimple,
    /// Flood broadcast
    Broadcast,
    /// Batched gossip broadcast
    BroadcastBatched,
    GCounter,
}

impl Program {
    /// Every program, in CLI listing order
    pub const ALL: [Program; 6] = [
        Program::Echo,
        Program::UniqueIds,
        Program::BroadcastSimple,
        Program::Broadcast,
        Program::BroadcastBatched,
        Program::GCounter,
    ];

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            Program::Echo => "echo",
            Program::UniqueIds => "unique-ids",
            Program::BroadcastSimple => "broadcast-simple",
            Program::Broadcast => "broadcast",
            Program::BroadcastBatched => "broadcast-batched",
            Program::GCounter => "g-counter",
        }
    }

    /// Build the node for this program on top of `transport`.
    ///
    /// Services are registered but not started; call [`Node::start`] once
    /// the transport is live.
    pub fn build(
        self,
        transport: Arc<dyn Transport>,
        config: &NodeConfig,
        tasks: TaskScope,
    ) -> Result<Node> {
        config.validate()?;
        let mut node = Node::new(transport.node_id(), tasks.clone());

        match self {
            Program::Echo => node.register(Arc::new(EchoService))?,
            Program::UniqueIds => node.register(Arc::new(UniqueIdService))?,
            Program::BroadcastSimple => node.register(Arc::new(BroadcastService::new(
                BroadcastMode::Local,
                transport,
                config,
                &tasks,
            )))?,
            Program::Broadcast => node.register(Arc::new(BroadcastService::new(
                BroadcastMode::Flood,
                transport,
                config,
                &tasks,
            )))?,
            Program::BroadcastBatched => node.register(Arc::new(BroadcastService::new(
                BroadcastMode::Batched,
                transport,
                config,
                &tasks,
            )))?,
            Program::GCounter => {
                let store = Arc::new(RemoteKv::new(transport, config.counter.store.clone()));
                node.register(Arc::new(CounterService::new(store, &config.counter)))?
            }
        }

        tracing::info!(
            "Node {} runs {} ({})",
            node.id(),
            self,
            node.message_types().join(", ")
        );
        Ok(node)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Program {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(Program::Echo),
            "unique-ids" | "uid" => Ok(Program::UniqueIds),
            "broadcast-simple" => Ok(Program::BroadcastSimple),
            "broadcast" | "broadcast-flood" => Ok(Program::Broadcast),
            "broadcast-batched" => Ok(Program::BroadcastBatched),
            "g-counter" | "counter" => Ok(Program::GCounter),
            other => Err(Error::config(format!(
                "unknown program '{}', expected one of: {}",
                other,
                Program::ALL.map(Program::name).join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimNetwork;

    #[test]
    fn test_parse_names_and_aliases() {
        for program in Program::ALL {
            assert_eq!(program.name().parse::<Program>().unwrap(), program);
        }
        assert_eq!("uid".parse::<Program>().unwrap(), Program::UniqueIds);
        assert_eq!("Broadcast".parse::<Program>().unwrap(), Program::Broadcast);
        assert!(matches!(
            "kafka".parse::<Program>(),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_build_registers_routes() {
        let net = SimNetwork::new(&["n1"]);
        let transport = net.transport("n1");
        let config = NodeConfig::default();

        let node = Program::BroadcastBatched
            .build(transport.clone(), &config, TaskScope::new())
            .unwrap();
        assert_eq!(node.message_types(), vec!["broadcast", "read", "share", "topology"]);

        let node = Program::GCounter
            .build(transport.clone(), &config, TaskScope::new())
            .unwrap();
        assert_eq!(node.message_types(), vec!["add", "read"]);

        let node = Program::Echo
            .build(transport, &config, TaskScope::new())
            .unwrap();
        assert_eq!(node.id(), "n1");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let net = SimNetwork::new(&["n1"]);
        let mut config = NodeConfig::default();
        config.batch.tick_ms = 0;
        assert!(
            Program::Broadcast
                .build(net.transport("n1"), &config, TaskScope::new())
                .is_err()
        );
    }
}
