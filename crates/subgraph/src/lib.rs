//! Subgraph compiler and instantiation engine.
//!
//! A [`SubgraphDefinition`] describes tasks, copies, barrier arrivals, nested
//! instantiations and reservation acquire/release operations plus the
//! dependency edges between them. [`SubgraphRuntime::create`] compiles it
//! into a topological schedule; every [`SubgraphRuntime::instantiate`] then
//! replays that schedule against fresh argument bytes, either by walking it
//! and merging events (classic) or through per-processor ready queues and
//! atomic counters (persistent replay). Handles owned by another node are
//! forwarded over the eisenbahn mesh.

pub mod compiler;
pub mod config;
pub mod definition;
pub mod error;
mod instantiate;
pub mod interpolation;
pub mod messages;
pub mod metrics;
pub mod policy;
mod replay;
pub mod runtime;

pub use compiler::{compile, CompiledSubgraph, ReplayPartition, ScheduleEntry};
pub use config::SubgraphConfig;
pub use definition::{
    AcquireOp, ArrivalOp, CopyOp, Dependency, InstantiationOp, Interpolation,
    InterpolationTarget, OpKey, OpKind, Operation, ReleaseOp, SubgraphDefinition, TaskOp,
};
pub use error::SubgraphError;
pub use metrics::SubgraphMetrics;
pub use policy::{
    ArrivalPlacement, ArrivalPlacementKind, FirstProcessorPlacement, ReplayMode,
    RoundRobinPlacement,
};
pub use runtime::{RuntimeContext, SubgraphId, SubgraphRuntime};
