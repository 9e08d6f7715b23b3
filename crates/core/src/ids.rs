use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a node (process) participating in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// A processor, addressed by its home node and a node-local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessorId {
    pub node: NodeId,
    pub index: u32,
}

impl ProcessorId {
    pub fn new(node: NodeId, index: u32) -> Self {
        Self { node, index }
    }
}

/// Task function registered with a processor service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskFuncId(pub u32);

/// Reduction operator id. Zero is reserved for "no reduction" (plain overwrite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReductionOpId(pub u32);

impl ReductionOpId {
    pub const NONE: ReductionOpId = ReductionOpId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// A memory region addressable by the copy service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:p{}", self.node, self.index)
    }
}

impl fmt::Display for TaskFuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_display_includes_node() {
        let p = ProcessorId::new(NodeId(2), 5);
        assert_eq!(p.to_string(), "n2:p5");
    }

    #[test]
    fn zero_reduction_id_means_overwrite() {
        assert!(ReductionOpId::NONE.is_none());
        assert!(!ReductionOpId(60).is_none());
    }
}
