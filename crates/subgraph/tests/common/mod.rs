//! Shared harness: one node wired to the in-process collaborator services.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use weave_core::{
    Event, EventService, LocalBarrierService, LocalCopyEngine, LocalEventService,
    LocalProcessorGroup, LocalReservationService, NodeId, ProcessorId, ReductionRegistry,
    TaskFuncId,
};
use weave_eisenbahn::NodeMesh;
use weave_subgraph::{ReplayMode, RuntimeContext, SubgraphConfig, SubgraphRuntime};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Appends its argument bytes to the node's log.
pub const RECORD: TaskFuncId = TaskFuncId(1);
/// Always panics, which poisons its completion event.
pub const FAIL: TaskFuncId = TaskFuncId(2);

pub struct TestNode {
    pub runtime: SubgraphRuntime,
    pub events: Arc<dyn EventService>,
    pub processors: Arc<LocalProcessorGroup>,
    pub barriers: Arc<LocalBarrierService>,
    pub reservations: Arc<LocalReservationService>,
    pub copies: Arc<LocalCopyEngine>,
    pub reductions: Arc<ReductionRegistry>,
    /// Arguments seen by [`RECORD`] tasks, in execution order.
    pub log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TestNode {
    pub fn new(mode: ReplayMode) -> Self {
        Self::build(NodeId(0), 2, mode, Arc::new(LocalEventService::new()), None)
    }

    /// A node with its own event table, reachable through `mesh`.
    pub fn on_mesh(
        node: NodeId,
        procs: usize,
        mode: ReplayMode,
        mesh: Arc<dyn NodeMesh>,
    ) -> Self {
        let events = Arc::new(LocalEventService::for_node(node));
        Self::build(node, procs, mode, events, Some(mesh))
    }

    /// A node whose collaborators all use `events`, reachable through `mesh`.
    pub fn build(
        node: NodeId,
        procs: usize,
        mode: ReplayMode,
        events: Arc<dyn EventService>,
        mesh: Option<Arc<dyn NodeMesh>>,
    ) -> Self {
        let processors = Arc::new(LocalProcessorGroup::new(node, procs, events.clone()));
        let barriers = Arc::new(LocalBarrierService::new(events.clone()));
        let reservations = Arc::new(LocalReservationService::new(events.clone()));
        let copies = Arc::new(LocalCopyEngine::new(events.clone()));
        let reductions = Arc::new(ReductionRegistry::new());

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        processors.register_task(
            RECORD,
            Arc::new(move |args: &[u8], _proc| sink.lock().push(args.to_vec())),
        );
        processors.register_task(FAIL, Arc::new(|_args: &[u8], _proc| panic!("task failure")));

        let mut ctx = RuntimeContext::new(
            node,
            events.clone(),
            barriers.clone(),
            reservations.clone(),
            processors.clone(),
            copies.clone(),
        )
        .with_reductions(reductions.clone());
        if let Some(mesh) = mesh {
            ctx = ctx.with_mesh(mesh);
        }
        let config = SubgraphConfig::default()
            .with_node(node)
            .with_replay_mode(mode);

        Self {
            runtime: SubgraphRuntime::new(ctx, config),
            events,
            processors,
            barriers,
            reservations,
            copies,
            reductions,
            log,
        }
    }

    pub fn proc(&self, index: u32) -> ProcessorId {
        self.processors.processor(index)
    }

    /// Block until `event` triggers; returns whether it was poisoned.
    pub fn wait(&self, event: Event) -> bool {
        self.events
            .wait_timeout(event, TIMEOUT)
            .unwrap_or_else(|| panic!("timed out waiting for {event}"))
    }

    /// Tags of recorded tasks, in execution order.
    pub fn tags(&self) -> Vec<u32> {
        self.log.lock().iter().map(|args| tag(args)).collect()
    }
}

/// Argument buffer for a [`RECORD`] task: the tag followed by `extra` zero
/// bytes.
pub fn tagged(tag: u32, extra: usize) -> Vec<u8> {
    let mut args = tag.to_le_bytes().to_vec();
    args.resize(4 + extra, 0);
    args
}

pub fn tag(args: &[u8]) -> u32 {
    u32::from_le_bytes([args[0], args[1], args[2], args[3]])
}

pub fn position(order: &[u32], tag: u32) -> usize {
    order
        .iter()
        .position(|&t| t == tag)
        .unwrap_or_else(|| panic!("task {tag} never ran: {order:?}"))
}
