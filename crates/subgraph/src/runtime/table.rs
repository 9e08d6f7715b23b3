use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use weave_core::NodeId;

use crate::compiler::CompiledSubgraph;

/// Handle to a compiled subgraph.
///
/// The owning node holds the compiled schedule; any node may instantiate or
/// destroy through the handle. `generation` detects use of a slot that has
/// since been freed and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubgraphId {
    pub owner: NodeId,
    pub index: u32,
    pub generation: u32,
}

impl SubgraphId {
    pub const fn new(owner: NodeId, index: u32, generation: u32) -> Self {
        Self {
            owner,
            index,
            generation,
        }
    }
}

impl fmt::Display for SubgraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sg:{}/{}.{}", self.owner, self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    compiled: Option<Arc<CompiledSubgraph>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Node-local table of compiled subgraphs with slot reuse.
pub struct HandleTable {
    owner: NodeId,
    inner: Mutex<Slots>,
}

impl HandleTable {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            inner: Mutex::new(Slots::default()),
        }
    }

    pub fn insert(&self, compiled: Arc<CompiledSubgraph>) -> SubgraphId {
        let mut inner = self.inner.lock();
        let index = match inner.free.pop() {
            Some(index) => {
                inner.slots[index as usize].compiled = Some(compiled);
                index
            }
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    compiled: Some(compiled),
                });
                (inner.slots.len() - 1) as u32
            }
        };
        SubgraphId::new(self.owner, index, inner.slots[index as usize].generation)
    }

    pub fn get(&self, id: SubgraphId) -> Option<Arc<CompiledSubgraph>> {
        if id.owner != self.owner {
            return None;
        }
        let inner = self.inner.lock();
        let slot = inner.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.compiled.clone()
    }

    /// Free the slot behind `id`. Returns the schedule on the first call and
    /// `None` on any later one. In-flight instantiations keep their own
    /// reference.
    pub fn remove(&self, id: SubgraphId) -> Option<Arc<CompiledSubgraph>> {
        if id.owner != self.owner {
            return None;
        }
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(id.index as usize) else {
            warn!(subgraph = %id, "destroy of unknown subgraph");
            return None;
        };
        if slot.generation != id.generation || slot.compiled.is_none() {
            warn!(subgraph = %id, "subgraph already destroyed");
            return None;
        }
        let compiled = slot.compiled.take();
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(id.index);
        compiled
    }

    /// Live subgraphs.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.len() - inner.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
