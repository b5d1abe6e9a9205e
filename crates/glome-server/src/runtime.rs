//! Stdio node runtime
//!
//! Reads one JSON message per line from stdin and writes one per line to
//! stdout.
//!
//! ```text
//! stdin ──► reader loop ──┬─ init ──────────────► build node, init_ok
//!                         ├─ reply ─────────────► pending[in_reply_to]
//!                         └─ request ──► task ──► node.dispatch ──┐
//!                                                                 ▼
//! stdout ◄── writer task ◄──────────────── outbox ◄───────────────┘
//! ```
//!
//! Requests are handled concurrently, each on its own task. Every outbound
//! line goes through a single writer task so lines never interleave.
//! End of input shuts the node down.

use dashmap::DashMap;
use glome_core::node::TaskScope;
use glome_core::transport::{Transport, into_result};
use glome_core::{Error, Node, NodeConfig, Program, Result};
use glome_protocol::payload::InitRequest;
use glome_protocol::{Body, ErrorCode, Message, RpcError, decode_line, encode_line, kinds};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

enum Outgoing {
    Line(Message),
    Close,
}

type Outbox = mpsc::UnboundedSender<Outgoing>;

/// [`Transport`] over the process's stdin/stdout
pub struct StdioTransport {
    id: String,
    node_ids: Vec<String>,
    outbox: Outbox,
    pending: Arc<DashMap<u64, oneshot::Sender<Body>>>,
    next_msg_id: AtomicU64,
}

impl StdioTransport {
    fn new(
        id: String,
        node_ids: Vec<String>,
        outbox: Outbox,
        pending: Arc<DashMap<u64, oneshot::Sender<Body>>>,
    ) -> Self {
        Self {
            id,
            node_ids,
            outbox,
            pending,
            next_msg_id: AtomicU64::new(1),
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn peer_ids(&self) -> &[String] {
        &self.node_ids
    }

    async fn send_with_timeout(&self, dest: &str, mut body: Body, timeout: Duration) -> Result<Body> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        body.msg_id = Some(msg_id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(msg_id, tx);

        let message = Message::new(self.id.as_str(), dest, body);
        if self.outbox.send(Outgoing::Line(message)).is_err() {
            self.pending.remove(&msg_id);
            return Err(Error::Shutdown);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => into_result(reply),
            Ok(Err(_)) => Err(Error::Shutdown),
            Err(_) => {
                self.pending.remove(&msg_id);
                Err(Error::Timeout(timeout))
            }
        }
    }
}

/// Runs one node program over a line stream
pub struct Runtime {
    program: Program,
    config: NodeConfig,
}

impl Runtime {
    /// Runtime that builds `program` on `init`
    pub fn new(program: Program, config: NodeConfig) -> Self {
        Self { program, config }
    }

    /// Serve stdin/stdout until end of input
    pub async fn run(self) -> Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve `reader`/`writer` until `reader` reaches end of input
    pub async fn run_with<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, rx));

        let pending: Arc<DashMap<u64, oneshot::Sender<Body>>> = Arc::new(DashMap::new());
        let requests = TaskTracker::new();
        let mut node: Option<Arc<Node>> = None;
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut read_error = None;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Reading input failed: {}", e);
                    read_error = Some(e);
                    break;
                }
            }

            let message = match std::str::from_utf8(&buf) {
                Ok(line) => match decode_line(line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Skipping undecodable line: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!("Skipping line that is not UTF-8: {}", e);
                    continue;
                }
            };
            tracing::debug!("Received {} from {}", message.kind(), message.src);

            if message.is_reply() {
                if let Some(in_reply_to) = message.body.in_reply_to {
                    match pending.remove(&in_reply_to) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(message.body);
                        }
                        None => tracing::debug!("Dropping late reply to {}", in_reply_to),
                    }
                }
                continue;
            }

            if message.kind() == kinds::INIT {
                let reply = self.init(&message, &mut node, &outbox, &pending);
                send(&outbox, message.reply(reply));
                continue;
            }

            let Some(node) = node.clone() else {
                tracing::warn!("{} before init from {}", message.kind(), message.src);
                let error = RpcError::new(ErrorCode::TemporarilyUnavailable, "node not initialized");
                send(&outbox, message.reply(Body::error(&error)));
                continue;
            };

            let outbox = outbox.clone();
            requests.spawn(async move {
                let reply = node.dispatch(&message).await;
                send(&outbox, message.reply(reply));
            });
        }

        tracing::info!("End of input, shutting down");
        if let Some(node) = &node {
            node.shutdown().await;
        }
        requests.close();
        if tokio::time::timeout(glome_core::node::SHUTDOWN_GRACE, requests.wait())
            .await
            .is_err()
        {
            tracing::warn!("{} requests still in flight at shutdown", requests.len());
        }

        let _ = outbox.send(Outgoing::Close);
        let written = match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(Error::internal(format!("writer task failed: {}", e))),
        };
        match read_error {
            Some(e) => Err(e.into()),
            None => written,
        }
    }

    fn init(
        &self,
        message: &Message,
        node: &mut Option<Arc<Node>>,
        outbox: &Outbox,
        pending: &Arc<DashMap<u64, oneshot::Sender<Body>>>,
    ) -> Body {
        let request: InitRequest = match message.body.decode() {
            Ok(request) => request,
            Err(e) => return Body::error(&Error::malformed(format!("init: {}", e)).to_rpc_error()),
        };

        if let Some(existing) = node {
            if existing.id() == request.node_id {
                return Body::new(kinds::INIT_OK);
            }
            return Body::error(&RpcError::new(
                ErrorCode::MalformedRequest,
                format!("already initialized as {}", existing.id()),
            ));
        }

        let transport = Arc::new(StdioTransport::new(
            request.node_id.clone(),
            request.node_ids.clone(),
            outbox.clone(),
            pending.clone(),
        ));
        match self.program.build(transport, &self.config, TaskScope::new()) {
            Ok(built) => {
                built.start();
                tracing::info!(
                    "Initialized {} in a cluster of {}",
                    request.node_id,
                    request.node_ids.len()
                );
                *node = Some(Arc::new(built));
                Body::new(kinds::INIT_OK)
            }
            Err(e) => {
                tracing::error!("Failed to build node {}: {}", request.node_id, e);
                Body::error(&e.to_rpc_error())
            }
        }
    }
}

fn send(outbox: &Outbox, message: Message) {
    if outbox.send(Outgoing::Line(message)).is_err() {
        tracing::warn!("Writer closed, dropping outbound message");
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outgoing>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outgoing) = rx.recv().await {
        let message = match outgoing {
            Outgoing::Line(message) => message,
            Outgoing::Close => break,
        };
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode {} to {}: {}", message.kind(), message.dest, e);
                continue;
            }
        };
        tracing::debug!("Sending {} to {}", message.kind(), message.dest);
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.flush().await?;
    Ok(())
}
