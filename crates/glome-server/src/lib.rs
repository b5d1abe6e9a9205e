//! glome Server - the `glome` node binary
//!
//! Runs one node program over stdin/stdout:
//! - `config` loads [`glome_core::NodeConfig`] from TOML and the environment
//! - `runtime` speaks the line protocol, answers `init`, correlates replies
//!   and dispatches requests to the node's services

#![warn(clippy::all)]

pub mod config;
pub mod runtime;

pub use runtime::{Runtime, StdioTransport};
