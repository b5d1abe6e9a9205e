//! Stdio runtime tests
//!
//! Drives a `Runtime` through an in-memory duplex pipe, playing the client
//! (and, for the counter, the key/value service) on the other end.

use glome_core::{NodeConfig, Program};
use glome_server::Runtime;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

struct Harness {
    input: WriteHalf<DuplexStream>,
    output: Lines<BufReader<ReadHalf<DuplexStream>>>,
    node: JoinHandle<glome_core::Result<()>>,
}

impl Harness {
    fn start(program: Program, config: NodeConfig) -> Self {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (node_in, node_out) = tokio::io::split(theirs);
        let (our_in, our_out) = tokio::io::split(ours);

        let node = tokio::spawn(Runtime::new(program, config).run_with(node_in, node_out));
        Self {
            input: our_out,
            output: BufReader::new(our_in).lines(),
            node,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("no output within 5s")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn init(&mut self, node_id: &str, node_ids: &[&str]) {
        self.send(json!({
            "src": "c0", "dest": node_id,
            "body": {"type": "init", "msg_id": 1, "node_id": node_id, "node_ids": node_ids}
        }))
        .await;
        let reply = self.recv().await;
        assert_eq!(
            reply,
            json!({"src": node_id, "dest": "c0", "body": {"type": "init_ok", "in_reply_to": 1}})
        );
    }

    async fn finish(mut self) {
        self.input.shutdown().await.unwrap();
        drop(self.input);
        self.node.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_echo_round_trip() {
    let mut h = Harness::start(Program::Echo, NodeConfig::default());
    h.init("n1", &["n1"]).await;

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 2, "echo": "hello"}}))
        .await;
    assert_eq!(
        h.recv().await,
        json!({"src": "n1", "dest": "c1", "body": {"type": "echo_ok", "in_reply_to": 2, "echo": "hello"}})
    );

    h.finish().await;
}

#[tokio::test]
async fn test_request_before_init_is_rejected() {
    let mut h = Harness::start(Program::Echo, NodeConfig::default());

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 7, "echo": 1}}))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply["body"]["type"], "error");
    assert_eq!(reply["body"]["code"], 11);
    assert_eq!(reply["body"]["in_reply_to"], 7);

    h.finish().await;
}

#[tokio::test]
async fn test_garbage_lines_are_skipped() {
    let mut h = Harness::start(Program::BroadcastSimple, NodeConfig::default());
    h.init("n1", &["n1"]).await;

    h.send_raw("this is not json\n\n").await;
    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2, "message": 5}}))
        .await;
    assert_eq!(h.recv().await["body"], json!({"type": "broadcast_ok", "in_reply_to": 2}));

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 3}}))
        .await;
    assert_eq!(
        h.recv().await["body"],
        json!({"type": "read_ok", "in_reply_to": 3, "messages": [5]})
    );

    h.finish().await;
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped() {
    let mut h = Harness::start(Program::BroadcastSimple, NodeConfig::default());
    h.init("n1", &["n1"]).await;

    h.input.write_all(b"\xff\xfe garbage\n").await.unwrap();
    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2, "message": 9}}))
        .await;
    assert_eq!(h.recv().await["body"], json!({"type": "broadcast_ok", "in_reply_to": 2}));
    assert!(!h.node.is_finished());

    h.finish().await;
}

#[tokio::test]
async fn test_unknown_type_gets_not_supported() {
    let mut h = Harness::start(Program::UniqueIds, NodeConfig::default());
    h.init("n1", &["n1"]).await;

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "txn", "msg_id": 4}}))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply["body"]["code"], 10);
    assert_eq!(reply["body"]["in_reply_to"], 4);

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "generate", "msg_id": 5}}))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply["body"]["type"], "generate_ok");
    assert!(reply["body"]["id"].as_str().is_some_and(|id| !id.is_empty()));

    h.finish().await;
}

#[tokio::test]
async fn test_counter_talks_to_store() {
    let mut config = NodeConfig::default();
    config.counter.heartbeat_ms = 60_000;
    let mut h = Harness::start(Program::GCounter, config);
    h.init("n1", &["n1", "n2"]).await;

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "add", "msg_id": 2, "delta": 2}}))
        .await;

    // The node reads the key first; it does not exist yet
    let read = h.recv().await;
    assert_eq!(read["dest"], "seq-kv");
    assert_eq!(read["body"]["type"], "read");
    assert_eq!(read["body"]["key"], "counter");
    h.send(json!({
        "src": "seq-kv", "dest": "n1",
        "body": {"type": "error", "in_reply_to": read["body"]["msg_id"], "code": 20, "text": "not found"}
    }))
    .await;

    // Then swaps 0 -> 2, creating the key
    let cas = h.recv().await;
    assert_eq!(cas["dest"], "seq-kv");
    assert_eq!(cas["body"]["type"], "cas");
    assert_eq!(cas["body"]["from"], 0);
    assert_eq!(cas["body"]["to"], 2);
    assert_eq!(cas["body"]["create_if_not_exists"], true);
    h.send(json!({
        "src": "seq-kv", "dest": "n1",
        "body": {"type": "cas_ok", "in_reply_to": cas["body"]["msg_id"]}
    }))
    .await;

    let reply = h.recv().await;
    assert_eq!(reply["dest"], "c1");
    assert_eq!(reply["body"], json!({"type": "add_ok", "in_reply_to": 2}));

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 3}}))
        .await;
    let read = h.recv().await;
    assert_eq!(read["body"]["type"], "read");
    h.send(json!({
        "src": "seq-kv", "dest": "n1",
        "body": {"type": "read_ok", "in_reply_to": read["body"]["msg_id"], "value": 2}
    }))
    .await;
    assert_eq!(
        h.recv().await["body"],
        json!({"type": "read_ok", "in_reply_to": 3, "value": 2})
    );

    h.finish().await;
}

#[tokio::test]
async fn test_flood_forwards_to_peers() {
    let mut h = Harness::start(Program::Broadcast, NodeConfig::default());
    h.init("n1", &["n1", "n2", "n3"]).await;

    h.send(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 2, "message": 42}}))
        .await;

    let mut forwarded = Vec::new();
    let mut acked = false;
    for _ in 0..3 {
        let out = h.recv().await;
        if out["dest"] == "c1" {
            assert_eq!(out["body"], json!({"type": "broadcast_ok", "in_reply_to": 2}));
            acked = true;
        } else {
            assert_eq!(out["body"]["type"], "broadcast");
            assert_eq!(out["body"]["message"], 42);
            forwarded.push(out);
        }
    }
    assert!(acked);

    let mut dests: Vec<_> = forwarded
        .iter()
        .map(|out| out["dest"].as_str().unwrap().to_string())
        .collect();
    dests.sort();
    assert_eq!(dests, vec!["n2", "n3"]);

    // Ack the gossip so shutdown finds nothing in flight
    for out in forwarded {
        let dest = out["dest"].clone();
        h.send(json!({
            "src": dest, "dest": "n1",
            "body": {"type": "broadcast_ok", "in_reply_to": out["body"]["msg_id"]}
        }))
        .await;
    }

    h.finish().await;
}
