use async_trait::async_trait;
use tracing::warn;
use weave_core::NodeId;

use crate::error::EisenbahnError;
use crate::message::Message;

/// Sends messages through a PUSH/PULL pipeline.
#[async_trait]
pub trait PipelineSender: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), EisenbahnError>;
}

/// Receives messages from a PUSH/PULL pipeline.
#[async_trait]
pub trait PipelineReceiver: Send + Sync {
    /// Pull the next message. Waits until one is available.
    async fn recv(&self) -> Result<Message, EisenbahnError>;
}

/// Consumer of messages delivered to this node.
///
/// Called from whatever context the mesh delivers on (the sender's thread
/// for the loopback mesh, a tokio task for the ZeroMQ mesh), so handlers must
/// not block.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: Message);

    /// A message this node queued for `target` was dropped after `send_to`
    /// had already returned.
    fn undeliverable(&self, target: NodeId, message: Message, error: &EisenbahnError) {
        warn!(target = target.0, topic = %message.topic, error = %error, "message dropped");
    }
}

/// Node-addressed, fire-and-forget delivery.
///
/// `send_to` is synchronous so it can be called from non-async code such as
/// task bodies and event waiters; implementations queue and return. Failures
/// found after queueing go to [`InboundHandler::undeliverable`].
pub trait NodeMesh: Send + Sync {
    fn local_node(&self) -> NodeId;

    fn send_to(&self, node: NodeId, message: Message) -> Result<(), EisenbahnError>;
}
