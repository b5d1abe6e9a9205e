//! `echo`: every field of the request comes back in an `echo_ok`

use crate::node::Service;
use crate::Result;
use async_trait::async_trait;
use glome_protocol::{Body, Message, kinds};

/// Answers `echo` with the request's own fields
#[derive(Debug, Default)]
pub struct EchoService;

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn message_types(&self) -> &'static [&'static str] {
        &[kinds::ECHO]
    }

    async fn handle(&self, request: &Message) -> Result<Body> {
        let mut reply = Body::new(kinds::ECHO_OK);
        reply.fields = request.body.fields.clone();
        Ok(reply)
    }
}
