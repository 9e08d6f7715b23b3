use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Event, EventService, EventWaiter};

/// Counting merge: triggers `target` once every registered precondition has
/// triggered and the merger has been armed.
///
/// The expected count is fixed up front (`prepare`), preconditions are added
/// one at a time, and `arm` releases the final hold. A poisoned input poisons
/// the target unless faults are ignored.
pub struct EventMerger {
    state: Arc<MergeState>,
    expected: usize,
    added: usize,
}

struct MergeState {
    events: Arc<dyn EventService>,
    target: Event,
    ignore_faults: bool,
    remaining: AtomicUsize,
    poisoned: AtomicBool,
}

impl EventMerger {
    pub fn prepare(
        events: Arc<dyn EventService>,
        target: Event,
        ignore_faults: bool,
        expected: usize,
    ) -> Self {
        Self {
            state: Arc::new(MergeState {
                events,
                target,
                ignore_faults,
                // one extra hold released by `arm`
                remaining: AtomicUsize::new(expected + 1),
                poisoned: AtomicBool::new(false),
            }),
            expected,
            added: 0,
        }
    }

    pub fn target(&self) -> Event {
        self.state.target
    }

    pub fn add_precondition(&mut self, event: Event) {
        assert!(
            self.added < self.expected,
            "merger for {} received more than {} preconditions",
            self.state.target,
            self.expected
        );
        self.added += 1;
        let waiter: Arc<dyn EventWaiter> = self.state.clone();
        self.state.events.add_waiter(event, waiter);
    }

    pub fn arm(self) {
        assert_eq!(
            self.added, self.expected,
            "merger for {} armed with {} of {} preconditions",
            self.state.target, self.added, self.expected
        );
        self.state.event_triggered(false);
    }
}

impl EventWaiter for MergeState {
    fn event_triggered(&self, poisoned: bool) {
        if poisoned && !self.ignore_faults {
            self.poisoned.store(true, Ordering::Release);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let poisoned = self.poisoned.load(Ordering::Acquire);
            self.events.trigger(self.target, poisoned);
        }
    }
}

/// Merge a set of events into one.
///
/// Absent events are dropped; zero remaining inputs yield `NO_EVENT` and a
/// single input is returned as-is.
pub fn merge_events(
    events: &Arc<dyn EventService>,
    inputs: &[Event],
    ignore_faults: bool,
) -> Event {
    let live: Vec<Event> = inputs.iter().copied().filter(|e| e.exists()).collect();
    match live.len() {
        0 => Event::NO_EVENT,
        1 => live[0],
        n => {
            let target = events.create();
            let mut merger = EventMerger::prepare(Arc::clone(events), target, ignore_faults, n);
            for e in live {
                merger.add_precondition(e);
            }
            merger.arm();
            target
        }
    }
}
