use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::{Event, EventService, EventWaiter};
use crate::ids::NodeId;

/// Triggered foreign events remembered for late waiters.
const FOREIGN_HISTORY: usize = 4096;

enum Slot {
    Pending(Vec<Arc<dyn EventWaiter>>),
    Triggered { poisoned: bool },
}

struct Table {
    next_seq: u64,
    slots: HashMap<u64, Slot>,
    /// Triggered foreign events in trigger order, oldest first.
    foreign_triggered: VecDeque<u64>,
}

/// In-process event table for one node.
///
/// Waiters run on the thread that triggers the event, outside the table lock,
/// so a waiter may freely create, trigger or wait on other events.
///
/// Only live state is kept. An event minted here is dropped from the table
/// once it triggers cleanly; any minted handle missing from the table has
/// therefore triggered. Poisoned events stay so late waiters still see the
/// poison. Handles minted by other nodes are tracked on first use and the
/// most recent `FOREIGN_HISTORY` triggered ones are remembered.
pub struct LocalEventService {
    node: NodeId,
    table: Mutex<Table>,
}

impl LocalEventService {
    /// Event table for node 0.
    pub fn new() -> Self {
        Self::for_node(NodeId(0))
    }

    pub fn for_node(node: NodeId) -> Self {
        Self {
            node,
            table: Mutex::new(Table {
                next_seq: 1,
                slots: HashMap::new(),
                foreign_triggered: VecDeque::new(),
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Number of events currently held: pending, poisoned, or recently
    /// triggered foreign ones.
    pub fn tracked(&self) -> usize {
        self.table.lock().slots.len()
    }
}

impl Default for LocalEventService {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    /// Minted here and already gone from the table.
    fn retired(&self, node: NodeId, event: Event) -> bool {
        event.node() == node
            && event.seq() < self.next_seq
            && !self.slots.contains_key(&event.0)
    }

    fn remember_foreign(&mut self, event: Event) {
        self.foreign_triggered.push_back(event.0);
        while self.foreign_triggered.len() > FOREIGN_HISTORY {
            if let Some(old) = self.foreign_triggered.pop_front() {
                self.slots.remove(&old);
            }
        }
    }
}

impl EventService for LocalEventService {
    fn create(&self) -> Event {
        let mut table = self.table.lock();
        let event = Event::new(self.node, table.next_seq);
        table.next_seq += 1;
        table.slots.insert(event.0, Slot::Pending(Vec::new()));
        event
    }

    fn has_triggered(&self, event: Event) -> bool {
        if !event.exists() {
            return true;
        }
        let table = self.table.lock();
        match table.slots.get(&event.0) {
            Some(Slot::Triggered { .. }) => true,
            Some(Slot::Pending(_)) => false,
            None => table.retired(self.node, event),
        }
    }

    fn trigger(&self, event: Event, poisoned: bool) {
        if !event.exists() {
            return;
        }
        let waiters = {
            let mut table = self.table.lock();
            if table.retired(self.node, event) {
                warn!(event = %event, "event triggered twice, ignoring");
                return;
            }
            let waiters = match table.slots.remove(&event.0) {
                Some(Slot::Pending(waiters)) => waiters,
                Some(triggered @ Slot::Triggered { .. }) => {
                    table.slots.insert(event.0, triggered);
                    warn!(event = %event, "event triggered twice, ignoring");
                    return;
                }
                None => Vec::new(),
            };
            if event.node() != self.node {
                table.slots.insert(event.0, Slot::Triggered { poisoned });
                table.remember_foreign(event);
            } else if poisoned {
                table.slots.insert(event.0, Slot::Triggered { poisoned });
            }
            waiters
        };
        for waiter in waiters {
            waiter.event_triggered(poisoned);
        }
    }

    fn add_waiter(&self, event: Event, waiter: Arc<dyn EventWaiter>) {
        if !event.exists() {
            waiter.event_triggered(false);
            return;
        }
        let fired = {
            let mut table = self.table.lock();
            if table.retired(self.node, event) {
                false
            } else {
                match table
                    .slots
                    .entry(event.0)
                    .or_insert_with(|| Slot::Pending(Vec::new()))
                {
                    Slot::Pending(waiters) => {
                        waiters.push(waiter);
                        return;
                    }
                    Slot::Triggered { poisoned } => *poisoned,
                }
            }
        };
        waiter.event_triggered(fired);
    }
}
