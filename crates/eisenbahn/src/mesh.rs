//! Node meshes: deliver a [`Message`] to a node by id.
//!
//! [`LoopbackHub`] connects any number of in-process nodes and delivers
//! synchronously on the sender's thread. [`ZmqNodeMesh`] binds this node's
//! PULL socket and pushes to peers over ZeroMQ, connecting lazily; messages
//! it cannot deliver are handed back to the served handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use weave_core::NodeId;

use crate::config::EisenbahnConfig;
use crate::error::EisenbahnError;
use crate::message::Message;
use crate::pipeline::{ZmqPipelineReceiver, ZmqPipelineSender};
use crate::traits::{InboundHandler, NodeMesh, PipelineReceiver, PipelineSender};

// ── Loopback ────────────────────────────────────────────────────────

/// Shared switchboard for in-process nodes.
#[derive(Default)]
pub struct LoopbackHub {
    handlers: RwLock<HashMap<NodeId, Arc<dyn InboundHandler>>>,
    delivered: AtomicU64,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mesh endpoint for `node`.
    pub fn mesh(self: &Arc<Self>, node: NodeId) -> LoopbackMesh {
        LoopbackMesh {
            hub: Arc::clone(self),
            node,
        }
    }

    /// Register the handler that receives messages addressed to `node`.
    pub fn register(&self, node: NodeId, handler: Arc<dyn InboundHandler>) {
        self.handlers.write().insert(node, handler);
    }

    /// Messages delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// One node's view of a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackMesh {
    hub: Arc<LoopbackHub>,
    node: NodeId,
}

impl NodeMesh for LoopbackMesh {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn send_to(&self, node: NodeId, message: Message) -> Result<(), EisenbahnError> {
        let handler = self
            .hub
            .handlers
            .read()
            .get(&node)
            .cloned()
            .ok_or(EisenbahnError::UnknownNode(node))?;
        // Same bytes a socket would carry.
        let message = Message::from_bytes(&message.to_bytes()?)?;
        debug!(from = self.node.0, to = node.0, topic = %message.topic, "loopback delivery");
        self.hub.delivered.fetch_add(1, Ordering::Relaxed);
        handler.handle(message);
        Ok(())
    }
}

// ── ZeroMQ ──────────────────────────────────────────────────────────

/// ZeroMQ-backed mesh for one node.
///
/// Must be created inside a tokio runtime. `send_to` only queues the message;
/// a background task owns the PUSH sockets.
pub struct ZmqNodeMesh {
    node: NodeId,
    config: EisenbahnConfig,
    receiver: Arc<ZmqPipelineReceiver>,
    outbound: mpsc::UnboundedSender<(NodeId, Message)>,
    handler: HandlerSlot,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

type HandlerSlot = Arc<RwLock<Option<Arc<dyn InboundHandler>>>>;

impl ZmqNodeMesh {
    /// Bind this node's PULL endpoint and start the outbound task.
    pub async fn bind(node: NodeId, config: EisenbahnConfig) -> Result<Self, EisenbahnError> {
        let transport = config
            .transport_for(node)
            .ok_or(EisenbahnError::UnknownNode(node))?;
        let receiver = Arc::new(ZmqPipelineReceiver::bind(&transport).await?);
        let (outbound, rx) = mpsc::unbounded_channel();
        let handler: HandlerSlot = Arc::default();
        let outbound_task =
            tokio::spawn(outbound_loop(node, config.clone(), rx, Arc::clone(&handler)));
        info!(node = node.0, endpoint = %transport, "node mesh bound");
        Ok(Self {
            node,
            config,
            receiver,
            outbound,
            handler,
            tasks: Mutex::new(vec![outbound_task]),
        })
    }

    /// Start delivering inbound messages to `handler`. Undeliverable
    /// outbound messages are reported to it as well.
    pub fn serve(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.write() = Some(Arc::clone(&handler));
        let receiver = Arc::clone(&self.receiver);
        let node = self.node;
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => handler.handle(message),
                    Err(EisenbahnError::Deserialization(e)) => {
                        warn!(node = node.0, error = %e, "dropping undecodable message");
                    }
                    Err(e) => {
                        error!(node = node.0, error = %e, "inbound socket failed");
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(node = self.node.0, "node mesh stopped");
    }
}

impl Drop for ZmqNodeMesh {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl NodeMesh for ZmqNodeMesh {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn send_to(&self, node: NodeId, message: Message) -> Result<(), EisenbahnError> {
        if self.config.transport_for(node).is_none() {
            return Err(EisenbahnError::UnknownNode(node));
        }
        self.outbound
            .send((node, message))
            .map_err(|_| EisenbahnError::MeshClosed)
    }
}

async fn outbound_loop(
    local: NodeId,
    config: EisenbahnConfig,
    mut rx: mpsc::UnboundedReceiver<(NodeId, Message)>,
    handler: HandlerSlot,
) {
    let mut peers: HashMap<NodeId, ZmqPipelineSender> = HashMap::new();
    let pipeline = config.pipeline_config();
    while let Some((target, message)) = rx.recv().await {
        if !peers.contains_key(&target) {
            let connected = match config.transport_for(target) {
                Some(transport) => ZmqPipelineSender::connect(&transport, &pipeline).await,
                None => Err(EisenbahnError::UnknownNode(target)),
            };
            match connected {
                Ok(sender) => {
                    peers.insert(target, sender);
                }
                Err(e) => {
                    error!(node = local.0, target = target.0, error = %e, "connect failed");
                    report_undeliverable(&handler, target, message, &e);
                    continue;
                }
            }
        }
        let Some(sender) = peers.get(&target) else {
            continue;
        };
        let topic = message.topic.clone();
        if let Err(e) = sender.send(message.clone()).await {
            error!(node = local.0, target = target.0, topic = %topic, error = %e, "send failed");
            // reconnect on the next message
            peers.remove(&target);
            report_undeliverable(&handler, target, message, &e);
        }
    }
    debug!(node = local.0, "outbound queue closed");
}

fn report_undeliverable(
    handler: &HandlerSlot,
    target: NodeId,
    message: Message,
    error: &EisenbahnError,
) {
    let handler = handler.read().clone();
    match handler {
        Some(handler) => handler.undeliverable(target, message, error),
        None => warn!(target = target.0, topic = %message.topic, "undeliverable message dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<Message>>);

    impl InboundHandler for Collect {
        fn handle(&self, message: Message) {
            self.0.lock().push(message);
        }
    }

    #[test]
    fn loopback_delivers_to_registered_node() {
        let hub = LoopbackHub::new();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        hub.register(NodeId(1), sink.clone());

        let mesh = hub.mesh(NodeId(0));
        assert_eq!(mesh.local_node(), NodeId(0));
        let msg = Message::new("weave.test", &7u32).unwrap().from_node(NodeId(0));
        mesh.send_to(NodeId(1), msg).unwrap();

        let got = sink.0.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].decode::<u32>().unwrap(), 7);
        assert_eq!(got[0].source, Some(NodeId(0)));
        assert_eq!(hub.delivered(), 1);
    }

    #[test]
    fn loopback_unknown_node_is_an_error() {
        let hub = LoopbackHub::new();
        let mesh = hub.mesh(NodeId(0));
        let msg = Message::new("weave.test", &()).unwrap();
        assert!(matches!(
            mesh.send_to(NodeId(9), msg),
            Err(EisenbahnError::UnknownNode(NodeId(9)))
        ));
    }
}
