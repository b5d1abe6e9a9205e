//! Typed body payloads
//!
//! Field names are wire-exact. Each struct maps to the type-specific fields
//! of one body shape; `type`, `msg_id` and `in_reply_to` live on
//! [`Body`](crate::Body).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// `init`: identity handed to a node at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    /// This node's id
    pub node_id: String,
    /// Every node in the cluster, including this one
    pub node_ids: Vec<String>,
}

/// `echo` / `echo_ok`: arbitrary fields bounced back verbatim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// `generate_ok`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOk {
    pub id: String,
}

/// `broadcast`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub message: i64,
}

/// `read_ok` for the broadcast workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReadOk {
    pub messages: Vec<i64>,
}

/// `topology`; the map is accepted and ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyRequest {
    #[serde(default)]
    pub topology: HashMap<String, Vec<String>>,
}

/// `share`: peer-to-peer batch of broadcast values
///
/// Exactly one of `message` and `messages` is expected. Use
/// [`ShareRequest::values`] to validate that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<i64>>,
}

/// Shape violations of a `share` body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareShape {
    /// Both `message` and `messages` present
    Ambiguous,
    /// Neither present
    Empty,
}

impl ShareRequest {
    /// Batch share
    pub fn batch(messages: Vec<i64>) -> Self {
        Self {
            message: None,
            messages: Some(messages),
        }
    }

    /// Single-value share
    pub fn single(message: i64) -> Self {
        Self {
            message: Some(message),
            messages: None,
        }
    }

    /// The carried values, or the shape violation
    pub fn values(&self) -> Result<Vec<i64>, ShareShape> {
        match (&self.message, &self.messages) {
            (Some(_), Some(_)) => Err(ShareShape::Ambiguous),
            (Some(value), None) => Ok(vec![*value]),
            (None, Some(values)) => Ok(values.clone()),
            (None, None) => Err(ShareShape::Empty),
        }
    }
}

/// `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    pub delta: i64,
}

/// `read_ok` for the counter workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReadOk {
    pub value: i64,
}

/// Key/value store `read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRead {
    pub key: String,
}

/// Key/value store `read_ok`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvReadOk {
    pub value: i64,
}

/// Key/value store `write`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvWrite {
    pub key: String,
    pub value: i64,
}

/// Key/value store `cas`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCas {
    pub key: String,
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub create_if_not_exists: bool,
}
