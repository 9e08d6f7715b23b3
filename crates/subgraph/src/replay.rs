//! Persistent replay: instantiation driven by per-processor ready queues and
//! atomic precondition counters instead of per-operation event merges.
//!
//! Each instantiation gets a [`ReplayInstance`] holding a private copy of the
//! arguments and a counter per operation, reset from the partition's
//! template. One [`ProcReplayState`] is installed on every processor the
//! partition uses. Whoever decrements a counter to zero pushes the operation
//! onto its processor's ready queue and wakes that processor; the processor
//! runs whatever is ready the next time it polls.
//!
//! Only immediate predecessors are tracked. Every processor's work has its
//! own finish event; the caller's finish event merges them.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use tracing::{debug, error, warn};
use weave_core::{
    Barrier, CoreError, Event, EventMerger, OnTrigger, ProcessorId, ReplayProgress, ReplayWork,
};

use crate::compiler::{CompiledSubgraph, CompletionTarget, ReplayPartition};
use crate::definition::{InterpolationTarget, OpKind};
use crate::error::Result;
use crate::interpolation::InterpolationScratch;
use crate::runtime::{Launch, RuntimeContext};

struct ProcQueue {
    /// Local indices whose counters reached zero.
    ready: SegQueue<u32>,
    /// Operations on this processor not yet complete.
    remaining: AtomicUsize,
    finish: Event,
}

pub(crate) struct ReplayInstance {
    ctx: RuntimeContext,
    compiled: Arc<CompiledSubgraph>,
    partition: Arc<ReplayPartition>,
    args: Vec<u8>,
    priority_adjust: i32,
    scratch_bytes: usize,
    counters: Box<[AtomicI32]>,
    queues: Vec<ProcQueue>,
    poisoned: AtomicBool,
}

/// Replay work installed on one processor.
struct ProcReplayState {
    instance: Arc<ReplayInstance>,
    slot: usize,
}

impl ReplayWork for ProcReplayState {
    fn run_ready(&self) -> ReplayProgress {
        let queue = &self.instance.queues[self.slot];
        while let Some(local) = queue.ready.pop() {
            ReplayInstance::execute(&self.instance, CompletionTarget {
                proc: self.slot as u32,
                index: local,
            });
        }
        if queue.remaining.load(Ordering::Acquire) == 0 {
            ReplayProgress::Done
        } else {
            ReplayProgress::Pending
        }
    }
}

/// Start a persistent replay of `compiled` over its `partition`.
///
/// A `wait_on` that has not triggered yet defers the whole start until it
/// does; the arguments are copied so the caller's buffer can go away. A start
/// that fails poisons the caller's finish event before anything runs.
pub(crate) fn launch(
    ctx: &RuntimeContext,
    compiled: &Arc<CompiledSubgraph>,
    partition: Arc<ReplayPartition>,
    launch: &Launch<'_>,
    scratch_bytes: usize,
) -> Result<()> {
    let instance = Arc::new(ReplayInstance::new(
        ctx.clone(),
        Arc::clone(compiled),
        partition,
        launch,
        scratch_bytes,
    ));

    if ctx.events.has_triggered(launch.wait_on) {
        return instance.start(launch.preconditions);
    }

    debug!(wait_on = %launch.wait_on, "replay start deferred");
    let preconditions = launch.preconditions.to_vec();
    let waiting = Arc::clone(&instance);
    ctx.events.add_waiter(
        launch.wait_on,
        OnTrigger::new(move |poisoned| {
            if poisoned {
                waiting.poisoned.store(true, Ordering::Release);
            }
            if let Err(e) = waiting.start(&preconditions) {
                error!(error = %e, "deferred replay failed to start");
            }
        }),
    );
    Ok(())
}

impl ReplayInstance {
    fn new(
        ctx: RuntimeContext,
        compiled: Arc<CompiledSubgraph>,
        partition: Arc<ReplayPartition>,
        launch: &Launch<'_>,
        scratch_bytes: usize,
    ) -> Self {
        let counters = partition
            .precondition_counts
            .iter()
            .map(|&count| AtomicI32::new(count))
            .collect();
        let queues = (0..partition.num_procs())
            .map(|slot| ProcQueue {
                ready: SegQueue::new(),
                remaining: AtomicUsize::new(partition.ops_of(slot).len()),
                finish: ctx.events.create(),
            })
            .collect::<Vec<_>>();

        let mut merger = EventMerger::prepare(
            Arc::clone(&ctx.events),
            launch.finish,
            false,
            queues.len(),
        );
        for queue in &queues {
            merger.add_precondition(queue.finish);
        }
        merger.arm();

        Self {
            ctx,
            compiled,
            partition,
            args: launch.args.to_vec(),
            priority_adjust: launch.priority_adjust,
            scratch_bytes,
            counters,
            queues,
            poisoned: AtomicBool::new(false),
        }
    }

    fn proc(&self, slot: usize) -> ProcessorId {
        self.partition.procs[slot]
    }

    /// Seed unconstrained operations, install per-processor work and wire
    /// the external preconditions. Every processor is checked before any
    /// work is installed.
    fn start(self: &Arc<Self>, preconditions: &[Event]) -> Result<()> {
        let partition = &self.partition;
        if let Some(&proc) = partition.procs.iter().find(|p| !self.ctx.processors.owns(**p)) {
            self.abort();
            return Err(CoreError::UnknownProcessor(proc).into());
        }
        for slot in 0..partition.num_procs() {
            let offset = partition.operation_offsets[slot];
            for flat in partition.ops_of(slot) {
                if self.counters[flat].load(Ordering::Relaxed) == 0 {
                    self.queues[slot].ready.push((flat - offset) as u32);
                }
            }
        }

        for slot in 0..partition.num_procs() {
            let work = Arc::new(ProcReplayState {
                instance: Arc::clone(self),
                slot,
            });
            self.ctx.processors.install_replay(self.proc(slot), work)?;
        }

        for index in 0..partition.num_external_preconditions() {
            if partition.external_fanout(index).is_empty() {
                continue;
            }
            match preconditions.get(index) {
                Some(&event) if event.exists() => {
                    let instance = Arc::clone(self);
                    self.ctx.events.add_waiter(
                        event,
                        OnTrigger::new(move |poisoned| instance.external_fired(index, poisoned)),
                    );
                }
                // missing caller preconditions count as satisfied
                _ => self.external_fired(index, false),
            }
        }

        for slot in 0..partition.num_procs() {
            self.ctx.processors.notify(self.proc(slot));
        }
        debug!(
            procs = partition.num_procs(),
            ops = partition.operations.len(),
            "replay installed"
        );
        Ok(())
    }

    /// Poison every per-processor finish event, and so the caller's.
    fn abort(&self) {
        self.poisoned.store(true, Ordering::Release);
        for queue in &self.queues {
            self.ctx.events.trigger(queue.finish, true);
        }
    }

    fn external_fired(&self, index: usize, poisoned: bool) {
        if poisoned {
            self.poisoned.store(true, Ordering::Release);
        }
        for target in self.partition.external_fanout(index) {
            self.release(*target);
        }
    }

    /// One precondition of `target` is satisfied.
    fn release(&self, target: CompletionTarget) {
        let flat = self.partition.flat_index(target);
        if self.counters[flat].fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queues[target.proc as usize].ready.push(target.index);
            self.ctx.processors.notify(self.proc(target.proc as usize));
        }
    }

    fn execute(this: &Arc<Self>, target: CompletionTarget) {
        let flat = this.partition.flat_index(target);
        let key = this.partition.operations[flat];
        let def = &this.compiled.definition;
        let interp = this.compiled.interpolator(this.partition.interp_ranges[flat].clone());
        let mut scratch = InterpolationScratch::new(this.scratch_bytes);
        let i = key.index as usize;

        match key.kind {
            OpKind::Task => {
                let op = &def.tasks[i];
                let args = interp.interpolate(
                    InterpolationTarget::TaskArgs,
                    &op.args,
                    &this.args,
                    &mut scratch,
                );
                let done = this.ctx.processors.spawn(
                    op.proc,
                    op.task,
                    args,
                    Event::NO_EVENT,
                    op.priority + this.priority_adjust,
                    &op.profiling,
                );
                let instance = Arc::clone(this);
                this.ctx.events.add_waiter(
                    done,
                    OnTrigger::new(move |poisoned| instance.complete(target, poisoned)),
                );
            }
            OpKind::Arrival => {
                let op = &def.arrivals[i];
                let mut barrier = op.barrier.to_bytes();
                interp.interpolate_in_place(
                    InterpolationTarget::ArrivalBarrier,
                    &mut barrier,
                    &this.args,
                );
                let value = interp.interpolate(
                    InterpolationTarget::ArrivalValue,
                    &op.reduce_value,
                    &this.args,
                    &mut scratch,
                );
                this.ctx
                    .barriers
                    .arrive(Barrier::from_bytes(&barrier), op.count, Event::NO_EVENT, value);
                this.complete(target, false);
            }
            other => {
                warn!(op = %key, kind = ?other, "operation kind cannot be replayed, skipping");
                this.complete(target, true);
            }
        }
    }

    fn complete(&self, target: CompletionTarget, poisoned: bool) {
        if poisoned {
            self.poisoned.store(true, Ordering::Release);
        }
        let flat = self.partition.flat_index(target);
        for successor in self.partition.successors(flat) {
            self.release(*successor);
        }
        let slot = target.proc as usize;
        let queue = &self.queues[slot];
        if queue.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx
                .events
                .trigger(queue.finish, self.poisoned.load(Ordering::Acquire));
            // let the processor observe completion and retire this work
            self.ctx.processors.notify(self.proc(slot));
        }
    }
}
