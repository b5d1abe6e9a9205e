//! glome core: replicated broadcast and grow-only counter
//!
//! This crate holds everything a node does between decoding a request and
//! encoding its reply:
//! - Dedup set of observed broadcast values
//! - Gossip sender with per-peer outboxes and bounded retries
//! - Flood and batched broadcast strategies
//! - Grow-only counter merged into a shared store by compare-and-swap
//! - Service registry (`Node`) and background task scope
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Node (service registry)              │
//! │   echo │ generate │ broadcast │ g-counter   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │     Broadcasters         Counter            │
//! │  (flood, batched)     (reconciler)          │
//! └──────────────┬───────────────┬──────────────┘
//!                │               │
//! ┌──────────────┴──────┐ ┌──────┴──────────────┐
//! │ Dedup Set, Gossip   │ │   KvStore seam      │
//! │ Sender              │ │ (RemoteKv/MemoryKv) │
//! └──────────────┬──────┘ └──────┬──────────────┘
//!                │               │
//! ┌──────────────┴───────────────┴──────────────┐
//! │               Transport seam                │
//! │   (stdio runtime, or SimNetwork in tests)   │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod batch;
pub mod broadcast;
pub mod config;
pub mod counter;
pub mod dedup;
pub mod echo;
pub mod error;
pub mod flood;
pub mod gossip;
pub mod kv;
pub mod node;
pub mod program;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod unique_id;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{Node, Service, TaskScope};
pub use program::Program;
pub use transport::Transport;
