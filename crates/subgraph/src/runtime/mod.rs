//! The node-local subgraph runtime.
//!
//! [`SubgraphRuntime`] owns the handle table of compiled subgraphs and routes
//! every call: handles owned by this node run here, anything else is shipped
//! to the owner through the configured [`NodeMesh`].

mod dispatch;
mod table;

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use weave_core::{
    BarrierService, CopyService, Event, EventService, NodeId, OnTrigger, ProcessorService,
    ProfilingRequestSet, ReductionRegistry, ReservationService,
};
use weave_eisenbahn::{EisenbahnError, InboundHandler, Message, NodeMesh};

use crate::compiler::{compile, CompiledSubgraph};
use crate::config::SubgraphConfig;
use crate::definition::SubgraphDefinition;
use crate::error::{Result, SubgraphError};
use crate::metrics::SubgraphMetrics;
use crate::policy::{ArrivalPlacement, ReplayMode};
use crate::{instantiate, replay};

pub use table::{HandleTable, SubgraphId};

/// The collaborator services a runtime drives.
#[derive(Clone)]
pub struct RuntimeContext {
    pub node: NodeId,
    pub events: Arc<dyn EventService>,
    pub barriers: Arc<dyn BarrierService>,
    pub reservations: Arc<dyn ReservationService>,
    pub processors: Arc<dyn ProcessorService>,
    pub copies: Arc<dyn CopyService>,
    pub reductions: Arc<ReductionRegistry>,
    /// Route to other nodes; `None` for single-node runtimes.
    pub mesh: Option<Arc<dyn NodeMesh>>,
}

impl RuntimeContext {
    pub fn new(
        node: NodeId,
        events: Arc<dyn EventService>,
        barriers: Arc<dyn BarrierService>,
        reservations: Arc<dyn ReservationService>,
        processors: Arc<dyn ProcessorService>,
        copies: Arc<dyn CopyService>,
    ) -> Self {
        Self {
            node,
            events,
            barriers,
            reservations,
            processors,
            copies,
            reductions: Arc::new(ReductionRegistry::new()),
            mesh: None,
        }
    }

    pub fn with_reductions(mut self, reductions: Arc<ReductionRegistry>) -> Self {
        self.reductions = reductions;
        self
    }

    pub fn with_mesh(mut self, mesh: Arc<dyn NodeMesh>) -> Self {
        self.mesh = Some(mesh);
        self
    }
}

/// One instantiation request, with every event already created by the
/// caller.
pub(crate) struct Launch<'a> {
    pub args: &'a [u8],
    pub profiling: &'a ProfilingRequestSet,
    pub preconditions: &'a [Event],
    pub postconditions: &'a [Event],
    pub wait_on: Event,
    pub finish: Event,
    pub priority_adjust: i32,
}

pub(crate) struct RuntimeInner {
    this: Weak<RuntimeInner>,
    pub(crate) ctx: RuntimeContext,
    pub(crate) config: SubgraphConfig,
    placement: Arc<dyn ArrivalPlacement>,
    table: HandleTable,
    metrics: Mutex<SubgraphMetrics>,
}

impl RuntimeInner {
    /// Run `launch` here or ship it to the owning node.
    pub(crate) fn launch(&self, id: SubgraphId, launch: &Launch<'_>) -> Result<()> {
        if id.owner != self.ctx.node {
            return self.send_instantiate(id, launch);
        }
        self.launch_local(id, launch)
    }

    pub(crate) fn launch_local(&self, id: SubgraphId, launch: &Launch<'_>) -> Result<()> {
        let compiled = self.table.get(id).ok_or(SubgraphError::UnknownSubgraph(id))?;
        if !launch.profiling.is_empty() {
            debug!(
                subgraph = %id,
                requests = launch.profiling.len(),
                "instantiation profiling requests ignored"
            );
        }
        let partition = compiled
            .partition
            .clone()
            .filter(|_| self.config.replay_mode.wants_persistent(true))
            .filter(|p| {
                let local = p.procs.iter().all(|proc| self.ctx.processors.owns(*proc));
                if !local {
                    debug!(subgraph = %id, "replay processors not hosted here, using classic path");
                }
                local
            });
        match partition {
            Some(partition) => {
                replay::launch(&self.ctx, &compiled, partition, launch, self.config.scratch_bytes)?;
                self.metrics.lock().persistent_instantiations += 1;
            }
            None => {
                instantiate::run(self, &compiled, launch);
                self.metrics.lock().classic_instantiations += 1;
            }
        }
        debug!(subgraph = %id, finish = %launch.finish, "instantiated");
        Ok(())
    }

    /// Trigger everything the caller may be waiting on, poisoned.
    pub(crate) fn fail_launch(&self, launch: &Launch<'_>) {
        for event in launch.postconditions {
            self.ctx.events.trigger(*event, true);
        }
        self.ctx.events.trigger(launch.finish, true);
    }

    pub(crate) fn destroy_local(self: &Arc<Self>, id: SubgraphId, wait_on: Event) -> Result<()> {
        if self.table.get(id).is_none() {
            return Err(SubgraphError::UnknownSubgraph(id));
        }
        if self.ctx.events.has_triggered(wait_on) {
            self.finish_destroy(id);
            return Ok(());
        }
        debug!(subgraph = %id, wait_on = %wait_on, "destroy deferred");
        let inner: Weak<Self> = Arc::downgrade(self);
        self.ctx.events.add_waiter(
            wait_on,
            OnTrigger::new(move |_| {
                if let Some(inner) = inner.upgrade() {
                    inner.finish_destroy(id);
                }
            }),
        );
        Ok(())
    }

    fn finish_destroy(&self, id: SubgraphId) {
        if self.table.remove(id).is_some() {
            self.metrics.lock().destroyed += 1;
            info!(subgraph = %id, "subgraph destroyed");
        }
    }
}

/// Compiles, stores and instantiates subgraphs for one node.
#[derive(Clone)]
pub struct SubgraphRuntime {
    inner: Arc<RuntimeInner>,
}

impl SubgraphRuntime {
    pub fn new(ctx: RuntimeContext, config: SubgraphConfig) -> Self {
        let placement = config.arrival_placement.build();
        Self::with_placement(ctx, config, placement)
    }

    /// Like [`SubgraphRuntime::new`] with a custom arrival placement policy.
    pub fn with_placement(
        ctx: RuntimeContext,
        config: SubgraphConfig,
        placement: Arc<dyn ArrivalPlacement>,
    ) -> Self {
        if config.node_id != ctx.node.0 {
            warn!(
                config = config.node_id,
                context = ctx.node.0,
                "config node id differs from context, using context"
            );
        }
        info!(node = ctx.node.0, mode = %config.replay_mode, "subgraph runtime started");
        Self {
            inner: Arc::new_cyclic(|this| RuntimeInner {
                this: this.clone(),
                table: HandleTable::new(ctx.node),
                ctx,
                config,
                placement,
                metrics: Mutex::new(SubgraphMetrics::default()),
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.inner.ctx.node
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.inner.ctx
    }

    pub fn config(&self) -> &SubgraphConfig {
        &self.inner.config
    }

    /// Compile `definition` and register it on this node.
    ///
    /// Compilation happens immediately; `wait_on` does not delay it and
    /// `profiling` is not used.
    pub fn create(
        &self,
        definition: SubgraphDefinition,
        profiling: &ProfilingRequestSet,
        wait_on: Event,
    ) -> Result<SubgraphId> {
        let inner = &self.inner;
        if !profiling.is_empty() {
            debug!(requests = profiling.len(), "create profiling requests ignored");
        }
        if !inner.ctx.events.has_triggered(wait_on) {
            debug!(wait_on = %wait_on, "compiling without waiting on precondition");
        }

        let started = Instant::now();
        let compiled = match compile(definition, &inner.ctx.reductions, &*inner.placement) {
            Ok(compiled) => compiled,
            Err(e) => {
                inner.metrics.lock().compile_failures += 1;
                error!(node = inner.ctx.node.0, error = %e, "subgraph compilation failed");
                return Err(e);
            }
        };
        inner.metrics.lock().record_compile(started.elapsed());

        if inner.config.replay_mode == ReplayMode::Persistent && !compiled.is_replayable() {
            warn!("schedule cannot be replayed per processor, using the classic path");
        }
        let entries = compiled.schedule.len();
        let replayable = compiled.is_replayable();
        let id = inner.table.insert(Arc::new(compiled));
        info!(subgraph = %id, entries, replayable, "subgraph created");
        Ok(id)
    }

    /// Destroy `id` once `wait_on` triggers. Instantiations already issued
    /// keep running.
    pub fn destroy(&self, id: SubgraphId, wait_on: Event) -> Result<()> {
        if id.owner != self.inner.ctx.node {
            return self.inner.send_destroy(id, wait_on);
        }
        self.inner.destroy_local(id, wait_on)
    }

    /// Instantiate `id` with `args`. Returns the finish event.
    pub fn instantiate(
        &self,
        id: SubgraphId,
        args: &[u8],
        profiling: &ProfilingRequestSet,
        wait_on: Event,
        priority_adjust: i32,
    ) -> Result<Event> {
        self.instantiate_with_conditions(
            id,
            args,
            profiling,
            &[],
            &mut [],
            wait_on,
            priority_adjust,
        )
    }

    /// Instantiate `id`, gating it on `preconditions` and filling
    /// `postconditions` with fresh events that trigger as the subgraph's
    /// external postconditions complete.
    #[allow(clippy::too_many_arguments)]
    pub fn instantiate_with_conditions(
        &self,
        id: SubgraphId,
        args: &[u8],
        profiling: &ProfilingRequestSet,
        preconditions: &[Event],
        postconditions: &mut [Event],
        wait_on: Event,
        priority_adjust: i32,
    ) -> Result<Event> {
        let events = &self.inner.ctx.events;
        for post in postconditions.iter_mut() {
            *post = events.create();
        }
        let finish = events.create();
        self.inner.launch(
            id,
            &Launch {
                args,
                profiling,
                preconditions,
                postconditions,
                wait_on,
                finish,
                priority_adjust,
            },
        )?;
        Ok(finish)
    }

    /// The compiled schedule behind a locally owned handle.
    pub fn compiled(&self, id: SubgraphId) -> Option<Arc<CompiledSubgraph>> {
        self.inner.table.get(id)
    }

    /// Number of live subgraphs owned by this node.
    pub fn live_subgraphs(&self) -> usize {
        self.inner.table.len()
    }

    pub fn metrics(&self) -> SubgraphMetrics {
        self.inner.metrics.lock().clone()
    }

    /// Execute a request received from another node.
    pub fn handle_message(&self, message: &Message) -> Result<()> {
        self.inner.handle_message(message)
    }

    /// Handler to register with a mesh. Holds the runtime weakly.
    pub fn inbound_handler(&self) -> Arc<dyn InboundHandler> {
        Arc::new(Inbound(Arc::downgrade(&self.inner)))
    }
}

struct Inbound(Weak<RuntimeInner>);

impl InboundHandler for Inbound {
    fn handle(&self, message: Message) {
        let Some(inner) = self.0.upgrade() else {
            debug!(topic = %message.topic, "runtime gone, dropping message");
            return;
        };
        if let Err(e) = inner.handle_message(&message) {
            error!(topic = %message.topic, source = ?message.source, error = %e, "request failed");
        }
    }

    fn undeliverable(&self, target: NodeId, message: Message, error: &EisenbahnError) {
        match self.0.upgrade() {
            Some(inner) => inner.undeliverable(target, &message, error),
            None => debug!(topic = %message.topic, "runtime gone, dropping lost message"),
        }
    }
}
