//! glome Protocol - wire format shared by every node
//!
//! Nodes talk line-delimited JSON over stdin/stdout. Each line is one
//! [`Message`]:
//!
//! ```text
//! {"src": "n1", "dest": "n2", "body": {"type": "broadcast", "msg_id": 7, "message": 5}}
//! ```
//!
//! The body always carries a `type`, may carry a `msg_id` (requests) or an
//! `in_reply_to` (replies), and otherwise holds type-specific fields. The
//! [`payload`] module has one struct per body shape so handlers never touch
//! raw JSON maps.
//!
//! Delivery is at-least-once and unordered: a message may arrive twice, late,
//! or not at all. Nothing in this crate papers over that.

#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod message;
pub mod payload;

pub use codec::{decode_line, encode_line};
pub use error::{ErrorCode, ProtocolError, RpcError};
pub use message::{Body, Message};

/// Message `type` strings, exactly as they appear on the wire.
pub mod kinds {
    pub const INIT: &str = "init";
    pub const INIT_OK: &str = "init_ok";
    pub const ERROR: &str = "error";

    pub const ECHO: &str = "echo";
    pub const ECHO_OK: &str = "echo_ok";
    pub const GENERATE: &str = "generate";
    pub const GENERATE_OK: &str = "generate_ok";

    pub const BROADCAST: &str = "broadcast";
    pub const BROADCAST_OK: &str = "broadcast_ok";
    pub const READ: &str = "read";
    pub const READ_OK: &str = "read_ok";
    pub const TOPOLOGY: &str = "topology";
    pub const TOPOLOGY_OK: &str = "topology_ok";
    pub const SHARE: &str = "share";

    pub const ADD: &str = "add";
    pub const ADD_OK: &str = "add_ok";

    pub const CAS: &str = "cas";
    pub const CAS_OK: &str = "cas_ok";
    pub const WRITE: &str = "write";
    pub const WRITE_OK: &str = "write_ok";
}
