use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Event, EventService, OnTrigger};

/// Handle to a reservation (a lock usable from the event graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reservation(pub u64);

/// Reservation service consumed by acquire/release operations.
pub trait ReservationService: Send + Sync {
    /// Request the reservation once `precondition` triggers. The returned
    /// event triggers when the grant is held.
    fn acquire(&self, reservation: Reservation, mode: u32, exclusive: bool, precondition: Event)
        -> Event;

    /// Release one grant once `precondition` triggers.
    fn release(&self, reservation: Reservation, precondition: Event);
}

#[derive(Clone, Copy)]
struct Request {
    mode: u32,
    exclusive: bool,
    granted: Event,
}

#[derive(Default)]
struct LockState {
    holders: u32,
    held: Option<(u32, bool)>,
    waiting: VecDeque<Request>,
}

impl LockState {
    fn compatible(&self, mode: u32, exclusive: bool) -> bool {
        match self.held {
            None => true,
            Some((held_mode, held_exclusive)) => {
                !exclusive && !held_exclusive && held_mode == mode && self.waiting.is_empty()
            }
        }
    }

    fn grant(&mut self, request: Request) {
        self.holders += 1;
        self.held = Some((request.mode, request.exclusive));
    }

    /// Pop every waiter that can be granted now, in FIFO order.
    fn drain_grantable(&mut self) -> Vec<Event> {
        let mut granted = Vec::new();
        while let Some(next) = self.waiting.front().copied() {
            let ok = match self.held {
                None => true,
                Some((mode, excl)) => !excl && !next.exclusive && mode == next.mode,
            };
            if !ok {
                break;
            }
            self.waiting.pop_front();
            self.grant(next);
            granted.push(next.granted);
        }
        granted
    }
}

struct ReservationTable {
    events: Arc<dyn EventService>,
    next_id: AtomicU64,
    locks: Mutex<HashMap<u64, LockState>>,
}

/// In-process FIFO reservation implementation with shared modes.
#[derive(Clone)]
pub struct LocalReservationService {
    table: Arc<ReservationTable>,
}

impl LocalReservationService {
    pub fn new(events: Arc<dyn EventService>) -> Self {
        Self {
            table: Arc::new(ReservationTable {
                events,
                next_id: AtomicU64::new(1),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn create_reservation(&self) -> Reservation {
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        self.table.locks.lock().insert(id, LockState::default());
        Reservation(id)
    }

    /// Current number of grants held.
    pub fn holders(&self, reservation: Reservation) -> u32 {
        self.table
            .locks
            .lock()
            .get(&reservation.0)
            .map(|s| s.holders)
            .unwrap_or(0)
    }
}

impl ReservationTable {
    fn request(&self, reservation: Reservation, request: Request) {
        let grant_now = {
            let mut locks = self.locks.lock();
            let state = locks.entry(reservation.0).or_default();
            if state.compatible(request.mode, request.exclusive) {
                state.grant(request);
                true
            } else {
                state.waiting.push_back(request);
                false
            }
        };
        if grant_now {
            self.events.trigger(request.granted, false);
        }
    }

    fn release(&self, reservation: Reservation) {
        let granted = {
            let mut locks = self.locks.lock();
            let Some(state) = locks.get_mut(&reservation.0) else {
                warn!(reservation = reservation.0, "release of unknown reservation");
                return;
            };
            if state.holders == 0 {
                warn!(reservation = reservation.0, "release of reservation nobody holds");
                return;
            }
            state.holders -= 1;
            if state.holders > 0 {
                return;
            }
            state.held = None;
            state.drain_grantable()
        };
        for event in granted {
            self.events.trigger(event, false);
        }
    }
}

impl ReservationService for LocalReservationService {
    fn acquire(
        &self,
        reservation: Reservation,
        mode: u32,
        exclusive: bool,
        precondition: Event,
    ) -> Event {
        let granted = self.table.events.create();
        let table = Arc::clone(&self.table);
        let request = Request {
            mode,
            exclusive,
            granted,
        };
        self.table.events.add_waiter(
            precondition,
            OnTrigger::new(move |_| table.request(reservation, request)),
        );
        granted
    }

    fn release(&self, reservation: Reservation, precondition: Event) {
        let table = Arc::clone(&self.table);
        self.table
            .events
            .add_waiter(precondition, OnTrigger::new(move |_| table.release(reservation)));
    }
}
