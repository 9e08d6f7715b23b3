//! Request payloads exchanged between nodes.
//!
//! Requests travel inside an eisenbahn [`Message`] under the topics in
//! [`weave_eisenbahn::topics`]. Neither request is acknowledged: the sender
//! created `finish_event` and the postcondition events before sending, and
//! waits on those. Each node keeps its own event table, so triggers cross
//! the mesh as [`EventTriggered`] notices in both directions: the caller
//! reports its `wait_on` and preconditions to the owner, the owner reports
//! the finish and postcondition events back to the node that minted them.

use serde::{Deserialize, Serialize};
use weave_core::{Event, NodeId, ProfilingRequestSet};
use weave_eisenbahn::{topics, Message};

use crate::error::Result;
use crate::runtime::SubgraphId;

/// Run one instantiation on the owning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiateRequest {
    pub subgraph: SubgraphId,
    pub wait_on: Event,
    pub finish_event: Event,
    pub priority_adjust: i32,
    #[serde(with = "serde_bytes_vec")]
    pub args: Vec<u8>,
    pub preconditions: Vec<Event>,
    pub postconditions: Vec<Event>,
    pub profiling: ProfilingRequestSet,
}

/// Destroy a subgraph on the owning node once `wait_on` triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyRequest {
    pub subgraph: SubgraphId,
    pub wait_on: Event,
}

/// `event` triggered on the sending node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTriggered {
    pub event: Event,
    pub poisoned: bool,
}

impl InstantiateRequest {
    pub fn to_message(&self, from: NodeId) -> Result<Message> {
        Ok(Message::new(topics::SUBGRAPH_INSTANTIATE, self)?.from_node(from))
    }
}

impl DestroyRequest {
    pub fn to_message(&self, from: NodeId) -> Result<Message> {
        Ok(Message::new(topics::SUBGRAPH_DESTROY, self)?.from_node(from))
    }
}

impl EventTriggered {
    pub fn to_message(&self, from: NodeId) -> Result<Message> {
        Ok(Message::new(topics::EVENT_TRIGGERED, self)?.from_node(from))
    }
}

/// Argument bytes as a MessagePack bin rather than an array of integers.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
