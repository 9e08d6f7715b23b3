use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Event, EventService, OnTrigger};
use crate::redop::ReductionOp;

/// Size of a barrier handle in its byte encoding.
pub const BARRIER_BYTES: usize = 16;

/// Handle to one generation of a phased barrier.
///
/// Handles travel inside argument buffers (so they can be interpolated), hence
/// the fixed little-endian byte encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Barrier {
    pub id: u64,
    pub generation: u64,
}

impl Barrier {
    pub const NO_BARRIER: Barrier = Barrier { id: 0, generation: 0 };

    pub fn exists(self) -> bool {
        self.id != 0
    }

    /// Handle for the following generation.
    pub fn advanced(self) -> Barrier {
        Barrier {
            id: self.id,
            generation: self.generation + 1,
        }
    }

    pub fn to_bytes(self) -> [u8; BARRIER_BYTES] {
        let mut out = [0u8; BARRIER_BYTES];
        out[..8].copy_from_slice(&self.id.to_le_bytes());
        out[8..].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; BARRIER_BYTES]) -> Barrier {
        let mut id = [0u8; 8];
        let mut generation = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        generation.copy_from_slice(&bytes[8..]);
        Barrier {
            id: u64::from_le_bytes(id),
            generation: u64::from_le_bytes(generation),
        }
    }
}

/// Phased barrier service.
pub trait BarrierService: Send + Sync {
    /// Handle for the next generation of `barrier`.
    fn advance(&self, barrier: Barrier) -> Barrier {
        barrier.advanced()
    }

    /// Arrive `count` times at `barrier` once `precondition` triggers,
    /// contributing `reduce_value` (may be empty) to the generation's reduction.
    fn arrive(&self, barrier: Barrier, count: u32, precondition: Event, reduce_value: &[u8]);

    /// Event that triggers when the generation named by `barrier` completes.
    fn generation_event(&self, barrier: Barrier) -> Event;
}

struct Generation {
    arrived: u32,
    event: Event,
    value: Option<Vec<u8>>,
    poisoned: bool,
    complete: bool,
}

struct BarrierState {
    expected: u32,
    reduction: Option<(Arc<dyn ReductionOp>, Vec<u8>)>,
    generations: HashMap<u64, Generation>,
}

struct BarrierTable {
    events: Arc<dyn EventService>,
    next_id: AtomicU64,
    barriers: Mutex<HashMap<u64, BarrierState>>,
}

/// In-process barrier implementation.
#[derive(Clone)]
pub struct LocalBarrierService {
    table: Arc<BarrierTable>,
}

impl LocalBarrierService {
    pub fn new(events: Arc<dyn EventService>) -> Self {
        Self {
            table: Arc::new(BarrierTable {
                events,
                next_id: AtomicU64::new(1),
                barriers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a barrier expecting `expected` arrivals per generation.
    pub fn create_barrier(&self, expected: u32) -> Barrier {
        self.create(expected, None)
    }

    /// Create a barrier whose generations fold arrival values with `op`,
    /// starting each generation from `initial`.
    pub fn create_reduction_barrier(
        &self,
        expected: u32,
        op: Arc<dyn ReductionOp>,
        initial: Vec<u8>,
    ) -> Barrier {
        self.create(expected, Some((op, initial)))
    }

    fn create(&self, expected: u32, reduction: Option<(Arc<dyn ReductionOp>, Vec<u8>)>) -> Barrier {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        self.table.barriers.lock().insert(
            id,
            BarrierState {
                expected,
                reduction,
                generations: HashMap::new(),
            },
        );
        Barrier { id, generation: 0 }
    }

    /// Reduction result of a completed generation.
    pub fn result(&self, barrier: Barrier) -> Option<Vec<u8>> {
        let barriers = self.table.barriers.lock();
        let generation = barriers.get(&barrier.id)?.generations.get(&barrier.generation)?;
        if generation.complete {
            generation.value.clone()
        } else {
            None
        }
    }
}

impl BarrierTable {
    fn generation<'a>(&self, state: &'a mut BarrierState, generation: u64) -> &'a mut Generation {
        let events = &self.events;
        state.generations.entry(generation).or_insert_with(|| Generation {
            arrived: 0,
            event: events.create(),
            value: state.reduction.as_ref().map(|(_, initial)| initial.clone()),
            poisoned: false,
            complete: false,
        })
    }

    fn apply_arrival(&self, barrier: Barrier, count: u32, poisoned: bool, value: &[u8]) {
        let completed = {
            let mut barriers = self.barriers.lock();
            let Some(state) = barriers.get_mut(&barrier.id) else {
                warn!(barrier = barrier.id, "arrival at unknown barrier");
                return;
            };
            let expected = state.expected;
            let reduction = state.reduction.as_ref().map(|(op, _)| Arc::clone(op));
            let generation = self.generation(state, barrier.generation);
            if generation.complete {
                warn!(
                    barrier = barrier.id,
                    generation = barrier.generation,
                    "arrival after generation completed"
                );
                return;
            }
            generation.arrived += count;
            generation.poisoned |= poisoned;
            if let (Some(op), Some(acc)) = (reduction, generation.value.as_mut()) {
                if !value.is_empty() {
                    op.apply_exclusive(acc, value);
                }
            }
            if generation.arrived >= expected {
                generation.complete = true;
                Some((generation.event, generation.poisoned))
            } else {
                None
            }
        };
        if let Some((event, poisoned)) = completed {
            self.events.trigger(event, poisoned);
        }
    }
}

impl BarrierService for LocalBarrierService {
    fn arrive(&self, barrier: Barrier, count: u32, precondition: Event, reduce_value: &[u8]) {
        let table = Arc::clone(&self.table);
        let value = reduce_value.to_vec();
        self.table.events.add_waiter(
            precondition,
            OnTrigger::new(move |poisoned| table.apply_arrival(barrier, count, poisoned, &value)),
        );
    }

    fn generation_event(&self, barrier: Barrier) -> Event {
        let mut barriers = self.table.barriers.lock();
        match barriers.get_mut(&barrier.id) {
            Some(state) => self.table.generation(state, barrier.generation).event,
            None => Event::NO_EVENT,
        }
    }
}
