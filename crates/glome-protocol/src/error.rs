//! Protocol error types
//!
//! [`ProtocolError`] covers local encode/decode failures. [`RpcError`] is the
//! payload of an `error` body sent by a remote node or service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding wire messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid JSON or a body that does not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload serialized to something other than a JSON object
    #[error("Body payload must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// An empty input line
    #[error("Empty message line")]
    EmptyLine,
}

/// Standard error codes carried in `error` bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    /// The request timed out before a reply arrived
    Timeout,
    /// The destination node does not exist
    NodeNotFound,
    /// The request type is not supported by the receiver
    NotSupported,
    /// The receiver cannot serve the request right now
    TemporarilyUnavailable,
    /// The request body was malformed
    MalformedRequest,
    /// The receiver crashed while handling the request
    Crash,
    /// The receiver aborted the request
    Abort,
    /// The requested key does not exist
    KeyDoesNotExist,
    /// The key already exists
    KeyAlreadyExists,
    /// A compare-and-swap precondition failed
    PreconditionFailed,
    /// A transaction conflicted with another one
    TxnConflict,
    /// Any code outside the standard table
    Other(u32),
}

impl ErrorCode {
    /// Numeric wire value
    pub fn code(self) -> u32 {
        match self {
            Self::Timeout => 0,
            Self::NodeNotFound => 1,
            Self::NotSupported => 10,
            Self::TemporarilyUnavailable => 11,
            Self::MalformedRequest => 12,
            Self::Crash => 13,
            Self::Abort => 14,
            Self::KeyDoesNotExist => 20,
            Self::KeyAlreadyExists => 21,
            Self::PreconditionFailed => 22,
            Self::TxnConflict => 30,
            Self::Other(code) => code,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            20 => Self::KeyDoesNotExist,
            21 => Self::KeyAlreadyExists,
            22 => Self::PreconditionFailed,
            30 => Self::TxnConflict,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Payload of an `error` body
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("RPC error {} ({code:?}): {text}", .code.code())]
pub struct RpcError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable description
    #[serde(default)]
    pub text: String,
}

impl RpcError {
    /// Create an RPC error
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table_roundtrip() {
        for code in [0, 1, 10, 11, 12, 13, 14, 20, 21, 22, 30] {
            assert_eq!(ErrorCode::from(code).code(), code);
        }
        assert_eq!(ErrorCode::from(1000), ErrorCode::Other(1000));
    }

    #[test]
    fn test_rpc_error_serializes_numeric_code() {
        let err = RpcError::new(ErrorCode::KeyDoesNotExist, "key counter missing");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 20);
        assert_eq!(json["text"], "key counter missing");
    }
}
