//! Classic instantiation: one pass over the compiled schedule that issues
//! every operation with a merged precondition event.
//!
//! The pass never blocks. Each operation's completion event is recorded in
//! its intermediate slot(s) so later entries can depend on it; entries marked
//! final feed a counting merge into the caller's finish event.

use std::sync::Arc;

use tracing::{error, trace};
use weave_core::{merge_events, Barrier, Event, EventMerger, EventService};

use crate::compiler::{CompiledSubgraph, Precondition, PreconditionSource, ScheduleEntry};
use crate::definition::{InterpolationTarget, OpKind};
use crate::interpolation::InterpolationScratch;
use crate::runtime::{Launch, RuntimeInner};

/// Resolve `preconditions` into `out`. Returns whether any came from an
/// earlier entry, which already waits on the start event transitively.
fn gather<'p>(
    preconditions: impl IntoIterator<Item = &'p Precondition>,
    intermediate: &[Event],
    external: &[Event],
    out: &mut Vec<Event>,
) -> bool {
    let mut chained = false;
    for pre in preconditions {
        match pre.source {
            PreconditionSource::Intermediate(slot) => {
                chained = true;
                out.push(intermediate[slot]);
            }
            // fewer caller preconditions than the schedule names: skip
            PreconditionSource::External(index) => match external.get(index as usize) {
                Some(event) if event.exists() => out.push(*event),
                _ => {}
            },
        }
    }
    chained
}

pub(crate) fn run(rt: &RuntimeInner, compiled: &CompiledSubgraph, launch: &Launch<'_>) {
    let ctx = &rt.ctx;
    let events: &Arc<dyn EventService> = &ctx.events;
    let def = &compiled.definition;

    let mut intermediate = vec![Event::NO_EVENT; compiled.num_intermediate_events];
    let mut gathered: Vec<Event> = Vec::with_capacity(compiled.max_preconditions);
    let mut scratch = InterpolationScratch::new(rt.config.scratch_bytes);
    let mut finish = (compiled.num_final_events > 0).then(|| {
        EventMerger::prepare(
            Arc::clone(events),
            launch.finish,
            false,
            compiled.num_final_events,
        )
    });

    for entry in &compiled.schedule {
        gathered.clear();
        let chained = gather(entry.port0(), &intermediate, launch.preconditions, &mut gathered);
        if !chained && launch.wait_on.exists() {
            gathered.push(launch.wait_on);
        }

        if entry.key.kind == OpKind::ExtPostcondition {
            complete_postcondition(events, entry, &gathered, launch.postconditions);
            continue;
        }

        let pre = merge_events(events, &gathered, false);
        let i = entry.key.index as usize;
        let interp = compiled.interpolator(entry.interps.clone());
        let base = entry.event_base;

        match entry.key.kind {
            OpKind::Task => {
                let op = &def.tasks[i];
                let args = interp.interpolate(
                    InterpolationTarget::TaskArgs,
                    &op.args,
                    launch.args,
                    &mut scratch,
                );
                intermediate[base] = ctx.processors.spawn(
                    op.proc,
                    op.task,
                    args,
                    pre,
                    op.priority + launch.priority_adjust,
                    &op.profiling,
                );
            }
            OpKind::Copy => {
                let op = &def.copies[i];
                intermediate[base] = ctx.copies.issue_copy(
                    &op.desc,
                    &op.profiling,
                    pre,
                    op.priority + launch.priority_adjust,
                );
            }
            OpKind::Arrival => {
                let op = &def.arrivals[i];
                let mut barrier = op.barrier.to_bytes();
                interp.interpolate_in_place(
                    InterpolationTarget::ArrivalBarrier,
                    &mut barrier,
                    launch.args,
                );
                let value = interp.interpolate(
                    InterpolationTarget::ArrivalValue,
                    &op.reduce_value,
                    launch.args,
                    &mut scratch,
                );
                ctx.barriers.arrive(Barrier::from_bytes(&barrier), op.count, pre, value);
                intermediate[base] = pre;
            }
            OpKind::Acquire => {
                let op = &def.acquires[i];
                intermediate[base] =
                    ctx.reservations
                        .acquire(op.reservation, op.mode, op.exclusive, pre);
            }
            OpKind::Release => {
                let op = &def.releases[i];
                ctx.reservations.release(op.reservation, pre);
                intermediate[base] = pre;
            }
            OpKind::Instantiation => {
                let op = &def.instantiations[i];
                let nested_pre: Vec<Event> = (1..=entry.max_port())
                    .map(|port| {
                        let mut on_port = Vec::new();
                        gather(
                            entry.on_port(port),
                            &intermediate,
                            launch.preconditions,
                            &mut on_port,
                        );
                        merge_events(events, &on_port, false)
                    })
                    .collect();
                let outputs: Vec<Event> =
                    (0..entry.event_count).map(|_| events.create()).collect();
                intermediate[base..base + entry.event_count].copy_from_slice(&outputs);

                let args = interp.interpolate(
                    InterpolationTarget::InstanceArgs,
                    &op.args,
                    launch.args,
                    &mut scratch,
                );
                let nested = Launch {
                    args,
                    profiling: &op.profiling,
                    preconditions: &nested_pre,
                    postconditions: &outputs[1..],
                    wait_on: pre,
                    finish: outputs[0],
                    priority_adjust: op.priority_adjust,
                };
                if let Err(e) = rt.launch(op.subgraph, &nested) {
                    error!(subgraph = %op.subgraph, error = %e, "nested instantiation failed");
                    rt.fail_launch(&nested);
                }
            }
            OpKind::ExtPrecondition | OpKind::ExtPostcondition => {
                unreachable!("external markers are not issued")
            }
        }
        trace!(op = %entry.key, pre = %pre, done = %intermediate[base], "issued");

        if entry.is_final {
            if let Some(merger) = finish.as_mut() {
                merger.add_precondition(intermediate[base]);
            }
        }
    }

    match finish {
        Some(merger) => merger.arm(),
        None => events.trigger(launch.finish, false),
    }
}

fn complete_postcondition(
    events: &Arc<dyn EventService>,
    entry: &ScheduleEntry,
    gathered: &[Event],
    postconditions: &[Event],
) {
    let Some(&post) = postconditions.get(entry.key.index as usize) else {
        return;
    };
    if !post.exists() {
        return;
    }
    if gathered.is_empty() {
        events.trigger(post, false);
        return;
    }
    let mut merger = EventMerger::prepare(Arc::clone(events), post, false, gathered.len());
    for event in gathered {
        merger.add_precondition(*event);
    }
    merger.arm();
}
