//! Shared vocabulary for the weave runtime.
//!
//! The subgraph engine never talks to hardware or the network directly. It
//! consumes a small set of collaborator services through the traits in this
//! crate:
//! - [`EventService`]: completion events, waiters and counting merges
//! - [`BarrierService`]: phased barriers with optional reductions
//! - [`ReservationService`]: reader/writer style reservations
//! - [`ProcessorService`]: task spawn and persistent replay hosting
//! - [`CopyService`]: region copies
//! - [`ReductionRegistry`]: reduction operators looked up by id
//!
//! Each service has an in-process `Local*` implementation used by tests, the
//! node binary and single-process deployments.

pub mod barrier;
pub mod config;
pub mod copy;
pub mod error;
pub mod event;
pub mod ids;
pub mod processor;
pub mod profiling;
pub mod redop;
pub mod reservation;

pub use barrier::{Barrier, BarrierService, LocalBarrierService, BARRIER_BYTES};
pub use copy::{CopyDesc, CopyService, LocalCopyEngine};
pub use error::CoreError;
pub use event::{
    merge_events, Event, EventMerger, EventService, EventWaiter, LocalEventService, OnTrigger,
};
pub use ids::{NodeId, ProcessorId, RegionId, ReductionOpId, TaskFuncId};
pub use processor::{LocalProcessorGroup, ProcessorService, ReplayProgress, ReplayWork, TaskFn};
pub use profiling::{ProfilingRequest, ProfilingRequestSet};
pub use redop::{FnReduction, ReductionOp, ReductionRegistry};
pub use reservation::{LocalReservationService, Reservation, ReservationService};
