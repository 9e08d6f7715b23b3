//! Messaging layer for the weave runtime: MessagePack envelopes carried over
//! ZeroMQ PUSH/PULL sockets, addressed by node id.

pub mod config;
pub mod error;
pub mod mesh;
pub mod message;
pub mod pipeline;
pub mod topics;
pub mod traits;
pub mod transport;

pub use config::{EisenbahnConfig, NodeConfig, PipelineSettings, TransportConfig};
pub use error::EisenbahnError;
pub use mesh::{LoopbackHub, LoopbackMesh, ZmqNodeMesh};
pub use message::Message;
pub use pipeline::{PipelineConfig, ZmqPipelineReceiver, ZmqPipelineSender};
pub use traits::{InboundHandler, NodeMesh, PipelineReceiver, PipelineSender};
pub use transport::Transport;
