//! Error types for glome-core

use glome_protocol::{ErrorCode, ProtocolError, RpcError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using glome Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for glome nodes
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors outside the wire codec
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wire encode/decode errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error body returned by a remote node or service
    #[error("Remote error: {0}")]
    Rpc(#[from] RpcError),

    /// A request got no reply within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Store read of an absent key
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Store compare-and-swap lost against a concurrent writer
    #[error("Compare-and-swap mismatch on key {key}: expected {expected}")]
    CasMismatch {
        /// Key the swap targeted
        key: String,
        /// Value the swap expected to find
        expected: i64,
    },

    /// Inbound request body could not be understood
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A peer broke the payload-shape contract
    #[error("Protocol contract violation: {0}")]
    ContractViolation(String),

    /// Destination is not a known node
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// No handler for the request type
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The node is shutting down
    #[error("Node is shutting down")]
    Shutdown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed-request error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create a contract-violation error
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    /// Create a not-supported error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire error reported to the caller when a handler fails with `self`
    pub fn to_rpc_error(&self) -> RpcError {
        let code = match self {
            Self::Rpc(remote) => return remote.clone(),
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::UnknownPeer(_) => ErrorCode::NodeNotFound,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::Shutdown => ErrorCode::TemporarilyUnavailable,
            Self::MalformedRequest(_)
            | Self::ContractViolation(_)
            | Self::Protocol(_)
            | Self::Json(_) => ErrorCode::MalformedRequest,
            Self::KeyNotFound(_) => ErrorCode::KeyDoesNotExist,
            Self::CasMismatch { .. } => ErrorCode::PreconditionFailed,
            Self::Io(_) | Self::Config(_) | Self::Internal(_) => ErrorCode::Crash,
        };
        RpcError::new(code, self.to_string())
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Requests the receiver rejected outright (unknown type, bad shape)
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Io(_) | Self::UnknownPeer(_) => true,
            Self::Rpc(remote) => !matches!(
                remote.code,
                ErrorCode::NotSupported | ErrorCode::MalformedRequest
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_mapping() {
        assert_eq!(
            Error::malformed("no delta").to_rpc_error().code,
            ErrorCode::MalformedRequest
        );
        assert_eq!(
            Error::contract("share carries message and messages")
                .to_rpc_error()
                .code,
            ErrorCode::MalformedRequest
        );
        assert_eq!(
            Error::not_supported("frobnicate").to_rpc_error().code,
            ErrorCode::NotSupported
        );

        let remote = RpcError::new(ErrorCode::TxnConflict, "busy");
        assert_eq!(Error::Rpc(remote.clone()).to_rpc_error(), remote);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(Error::Rpc(RpcError::new(ErrorCode::Crash, "")).is_retryable());
        assert!(!Error::Rpc(RpcError::new(ErrorCode::NotSupported, "")).is_retryable());
        assert!(!Error::Rpc(RpcError::new(ErrorCode::MalformedRequest, "")).is_retryable());
        assert!(Error::Rpc(RpcError::new(ErrorCode::TemporarilyUnavailable, "")).is_retryable());
        assert!(!Error::Shutdown.is_retryable());
        assert!(!Error::malformed("x").is_retryable());
    }
}
