//! `generate`: globally unique ids without coordination
//!
//! An id is 128 random bytes, base64 encoded. Collisions are not checked;
//! at that width they do not happen.

use crate::node::Service;
use crate::Result;
use async_trait::async_trait;
use base64::Engine;
use glome_protocol::payload::GenerateOk;
use glome_protocol::{Body, Message, kinds};
use rand::RngCore;

/// Random bytes per id
pub const ID_BYTES: usize = 128;

/// Fresh random id
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Answers `generate` with a fresh random id
#[derive(Debug, Default)]
pub struct UniqueIdService;

#[async_trait]
impl Service for UniqueIdService {
    fn name(&self) -> &'static str {
        "unique-ids"
    }

    fn message_types(&self) -> &'static [&'static str] {
        &[kinds::GENERATE]
    }

    async fn handle(&self, _request: &Message) -> Result<Body> {
        Ok(Body::with_payload(
            kinds::GENERATE_OK,
            &GenerateOk { id: generate_id() },
        )?)
    }
}
