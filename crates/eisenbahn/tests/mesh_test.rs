//! Integration tests for node-addressed delivery over ZeroMQ.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use weave_core::NodeId;
use weave_eisenbahn::{
    EisenbahnConfig, EisenbahnError, InboundHandler, Message, NodeMesh, ZmqNodeMesh,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

struct Forward(mpsc::UnboundedSender<Message>);

impl InboundHandler for Forward {
    fn handle(&self, message: Message) {
        let _ = self.0.send(message);
    }
}

struct Dropped(mpsc::UnboundedSender<(NodeId, Message)>);

impl InboundHandler for Dropped {
    fn handle(&self, _message: Message) {}

    fn undeliverable(&self, target: NodeId, message: Message, error: &EisenbahnError) {
        assert!(matches!(error, EisenbahnError::ConnectTimeout(_)), "{error}");
        let _ = self.0.send((target, message));
    }
}

#[tokio::test]
async fn two_nodes_exchange_messages() {
    let config = EisenbahnConfig::distributed("127.0.0.1", 16300, 2);

    let node0 = ZmqNodeMesh::bind(NodeId(0), config.clone()).await.unwrap();
    let node1 = ZmqNodeMesh::bind(NodeId(1), config.clone()).await.unwrap();

    let (tx0, mut rx0) = mpsc::unbounded_channel();
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    node0.serve(Arc::new(Forward(tx0)));
    node1.serve(Arc::new(Forward(tx1)));
    tokio::time::sleep(SETTLE).await;

    for i in 0..3u32 {
        let msg = Message::new("weave.test", &i).unwrap().from_node(NodeId(0));
        node0.send_to(NodeId(1), msg).unwrap();
    }
    for i in 0..3u32 {
        let got = timeout(TIMEOUT, rx1.recv()).await.unwrap().unwrap();
        assert_eq!(got.decode::<u32>().unwrap(), i);
        assert_eq!(got.source, Some(NodeId(0)));
    }

    let reply = Message::new("weave.reply", &"ack".to_string())
        .unwrap()
        .from_node(NodeId(1));
    node1.send_to(NodeId(0), reply).unwrap();
    let got = timeout(TIMEOUT, rx0.recv()).await.unwrap().unwrap();
    assert_eq!(got.topic, "weave.reply");

    node0.shutdown();
    node1.shutdown();
}

#[tokio::test]
async fn unknown_node_rejected_before_queueing() {
    let config = EisenbahnConfig::distributed("127.0.0.1", 16310, 1);
    let node0 = ZmqNodeMesh::bind(NodeId(0), config).await.unwrap();
    let msg = Message::new("weave.test", &()).unwrap();
    assert!(matches!(
        node0.send_to(NodeId(5), msg),
        Err(EisenbahnError::UnknownNode(NodeId(5)))
    ));
}

#[tokio::test]
async fn bind_fails_for_unconfigured_node() {
    let config = EisenbahnConfig::distributed("127.0.0.1", 16320, 1);
    assert!(matches!(
        ZmqNodeMesh::bind(NodeId(3), config).await,
        Err(EisenbahnError::UnknownNode(NodeId(3)))
    ));
}

#[tokio::test]
async fn silent_peer_is_reported_undeliverable() {
    let mut config = EisenbahnConfig::distributed("127.0.0.1", 16330, 2);
    config.pipeline.connect_timeout_ms = 200;
    // node 1 is configured but never binds
    let node0 = ZmqNodeMesh::bind(NodeId(0), config).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    node0.serve(Arc::new(Dropped(tx)));

    let msg = Message::new("weave.test", &42u32).unwrap().from_node(NodeId(0));
    node0.send_to(NodeId(1), msg).unwrap();

    let (target, message) = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(target, NodeId(1));
    assert_eq!(message.decode::<u32>().unwrap(), 42);
    node0.shutdown();
}
