//! Completion events.
//!
//! An [`Event`] is a cheap, copyable handle. Everything that happens to it
//! (triggering, waiting, merging) goes through an [`EventService`]. Handles
//! are plain integers so they can be shipped between nodes inside messages;
//! the high 16 bits name the node that minted the event, so handles from
//! different nodes never collide.

mod local;
mod merge;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

pub use local::LocalEventService;
pub use merge::{merge_events, EventMerger};

/// Handle to a one-shot completion event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Event(pub u64);

const NODE_SHIFT: u32 = 48;
const SEQ_MASK: u64 = (1 << NODE_SHIFT) - 1;

impl Event {
    /// The absent event. Always considered triggered.
    pub const NO_EVENT: Event = Event(0);

    /// Event number `seq` minted by `node`. `seq` must be non-zero and
    /// `node` must fit in 16 bits.
    pub fn new(node: NodeId, seq: u64) -> Self {
        debug_assert!(node.0 <= u16::MAX as u32, "node id {} too large", node.0);
        debug_assert!(seq != 0 && seq <= SEQ_MASK);
        Event((u64::from(node.0) << NODE_SHIFT) | (seq & SEQ_MASK))
    }

    pub fn exists(self) -> bool {
        self.0 != 0
    }

    /// Node that minted this event.
    pub fn node(self) -> NodeId {
        NodeId((self.0 >> NODE_SHIFT) as u32)
    }

    pub fn seq(self) -> u64 {
        self.0 & SEQ_MASK
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "ev:{:x}", self.0)
        } else {
            write!(f, "NO_EVENT")
        }
    }
}

/// Callback invoked exactly once per registration when an event triggers.
pub trait EventWaiter: Send + Sync {
    fn event_triggered(&self, poisoned: bool);
}

/// The completion-notification service consumed by the subgraph engine.
pub trait EventService: Send + Sync {
    /// Create a fresh untriggered event.
    fn create(&self) -> Event;

    fn has_triggered(&self, event: Event) -> bool;

    /// Trigger an event, running its waiters on the calling thread.
    fn trigger(&self, event: Event, poisoned: bool);

    /// Register a waiter. Runs it immediately if the event already triggered.
    fn add_waiter(&self, event: Event, waiter: Arc<dyn EventWaiter>);

    /// Block until `event` triggers. Returns whether it was poisoned.
    fn wait(&self, event: Event) -> bool {
        if !event.exists() {
            return false;
        }
        let latch = Arc::new(Latch::default());
        self.add_waiter(event, latch.clone());
        latch.wait(None).unwrap_or(false)
    }

    /// Like [`EventService::wait`], but gives up after `timeout`.
    /// Returns `None` on timeout.
    fn wait_timeout(&self, event: Event, timeout: Duration) -> Option<bool> {
        if !event.exists() {
            return Some(false);
        }
        let latch = Arc::new(Latch::default());
        self.add_waiter(event, latch.clone());
        latch.wait(Some(timeout))
    }
}

/// Adapts a one-shot closure into an [`EventWaiter`].
pub struct OnTrigger<F> {
    callback: Mutex<Option<F>>,
}

impl<F> OnTrigger<F>
where
    F: FnOnce(bool) + Send + 'static,
{
    pub fn new(callback: F) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(Some(callback)),
        })
    }
}

impl<F> EventWaiter for OnTrigger<F>
where
    F: FnOnce(bool) + Send + 'static,
{
    fn event_triggered(&self, poisoned: bool) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(poisoned);
        }
    }
}

#[derive(Default)]
struct Latch {
    state: Mutex<Option<bool>>,
    cond: Condvar,
}

impl Latch {
    fn wait(&self, timeout: Option<Duration>) -> Option<bool> {
        let mut state = self.state.lock();
        match timeout {
            None => {
                while state.is_none() {
                    self.cond.wait(&mut state);
                }
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while state.is_none() {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *state
    }
}

impl EventWaiter for Latch {
    fn event_triggered(&self, poisoned: bool) {
        *self.state.lock() = Some(poisoned);
        self.cond.notify_all();
    }
}
