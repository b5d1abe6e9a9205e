//! Message envelope and body

use crate::error::{ProtocolError, RpcError};
use crate::kinds;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender node or client id
    pub src: String,
    /// Destination node or service id
    pub dest: String,
    /// Message body
    pub body: Body,
}

impl Message {
    /// Create a message
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Address `body` back to the sender of this message.
    ///
    /// `in_reply_to` is set to this message's `msg_id`.
    pub fn reply(&self, mut body: Body) -> Message {
        body.in_reply_to = self.body.msg_id;
        Message {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body,
        }
    }

    /// Message type of the body
    pub fn kind(&self) -> &str {
        &self.body.kind
    }

    /// Whether this message answers an earlier request
    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }
}

/// Message body
///
/// `type`, `msg_id` and `in_reply_to` are lifted into fields; everything
/// else stays in `fields` and is decoded on demand with [`Body::decode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Message type; empty for bare acknowledgements
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Request id, unique per sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,

    /// Id of the request this body answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,

    /// Type-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    /// Create a body with no fields
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Empty acknowledgement: no type, no fields
    pub fn ack() -> Self {
        Self::default()
    }

    /// Create a body from a payload struct
    pub fn with_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let fields = match serde_json::to_value(payload)? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            Value::Bool(_) => return Err(ProtocolError::NotAnObject("bool")),
            Value::Number(_) => return Err(ProtocolError::NotAnObject("number")),
            Value::String(_) => return Err(ProtocolError::NotAnObject("string")),
            Value::Array(_) => return Err(ProtocolError::NotAnObject("array")),
        };

        Ok(Self {
            kind: kind.into(),
            fields,
            ..Default::default()
        })
    }

    /// Error body for `error`
    pub fn error(error: &RpcError) -> Self {
        let mut body = Self::new(kinds::ERROR);
        body.fields
            .insert("code".to_string(), Value::from(error.code.code()));
        body.fields
            .insert("text".to_string(), Value::from(error.text.clone()));
        body
    }

    /// Set a single field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Decode the type-specific fields into a payload struct
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Whether this is an `error` body
    pub fn is_error(&self) -> bool {
        self.kind == kinds::ERROR
    }

    /// The carried error, if this is a well-formed `error` body
    pub fn rpc_error(&self) -> Option<RpcError> {
        if !self.is_error() {
            return None;
        }
        self.decode().ok()
    }
}
