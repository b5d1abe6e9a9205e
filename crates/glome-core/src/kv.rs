//! Key/value store seam
//!
//! The counter reconciles against an external linearizable store offering
//! integer reads and compare-and-swap. [`RemoteKv`] reaches the store service
//! through the node's transport; [`MemoryKv`] is an in-process store with the
//! same semantics.

use crate::transport::Transport;
use crate::{Error, Result};
use async_trait::async_trait;
use glome_protocol::payload::{KvCas, KvRead, KvReadOk};
use glome_protocol::{Body, ErrorCode, kinds};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Integer key/value store with compare-and-swap
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read `key`; [`Error::KeyNotFound`] when absent
    async fn read_int(&self, key: &str, timeout: Duration) -> Result<i64>;

    /// Set `key` to `to` if it currently holds `from`.
    ///
    /// With `create_if_absent`, an absent key is created holding `to`.
    /// A failed precondition is [`Error::CasMismatch`].
    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_absent: bool,
        timeout: Duration,
    ) -> Result<()>;
}

/// Store service reached over the transport (`seq-kv`, `lin-kv`)
pub struct RemoteKv {
    transport: Arc<dyn Transport>,
    service: String,
}

impl RemoteKv {
    /// Create a client for the store service named `service`
    pub fn new(transport: Arc<dyn Transport>, service: impl Into<String>) -> Self {
        Self {
            transport,
            service: service.into(),
        }
    }

    /// Store service node id
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl KvStore for RemoteKv {
    async fn read_int(&self, key: &str, timeout: Duration) -> Result<i64> {
        let body = Body::with_payload(
            kinds::READ,
            &KvRead {
                key: key.to_string(),
            },
        )?;
        match self
            .transport
            .send_with_timeout(&self.service, body, timeout)
            .await
        {
            Ok(reply) => Ok(reply.decode::<KvReadOk>()?.value),
            Err(Error::Rpc(remote)) if remote.code == ErrorCode::KeyDoesNotExist => {
                Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_absent: bool,
        timeout: Duration,
    ) -> Result<()> {
        let body = Body::with_payload(
            kinds::CAS,
            &KvCas {
                key: key.to_string(),
                from,
                to,
                create_if_not_exists: create_if_absent,
            },
        )?;
        match self
            .transport
            .send_with_timeout(&self.service, body, timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Rpc(remote)) if remote.code == ErrorCode::PreconditionFailed => {
                Err(Error::CasMismatch {
                    key: key.to_string(),
                    expected: from,
                })
            }
            Err(Error::Rpc(remote)) if remote.code == ErrorCode::KeyDoesNotExist => {
                Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// In-process linearizable store
#[derive(Debug, Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, i64>>,
}

impl MemoryKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).copied()
    }

    /// Unconditional write
    pub fn put(&self, key: &str, value: i64) {
        self.values.lock().insert(key.to_string(), value);
    }

    fn cas(&self, key: &str, from: i64, to: i64, create_if_absent: bool) -> Result<()> {
        let mut values = self.values.lock();
        match values.get_mut(key) {
            Some(current) if *current == from => {
                *current = to;
                Ok(())
            }
            Some(_) => Err(Error::CasMismatch {
                key: key.to_string(),
                expected: from,
            }),
            None if create_if_absent => {
                values.insert(key.to_string(), to);
                Ok(())
            }
            None => Err(Error::KeyNotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn read_int(&self, key: &str, _timeout: Duration) -> Result<i64> {
        self.get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_absent: bool,
        _timeout: Duration,
    ) -> Result<()> {
        self.cas(key, from, to, create_if_absent)
    }
}
