//! Integration tests for persistent replay through per-processor queues.

mod common;

use std::sync::Arc;
use std::time::Duration;

use weave_core::{
    Barrier, BarrierService, CopyDesc, Event, EventService, FnReduction, NodeId, ProcessorId,
    ProfilingRequestSet,
};
use weave_subgraph::{
    ArrivalOp, CopyOp, Interpolation, InterpolationTarget, OpKey, ReplayMode,
    SubgraphDefinition, SubgraphId, TaskOp,
};

use common::{position, tagged, TestNode, FAIL, RECORD};

const EDGES: [(usize, usize); 7] = [(0, 1), (0, 2), (1, 3), (2, 3), (0, 3), (1, 2), (1, 4)];

fn create(node: &TestNode, def: SubgraphDefinition) -> SubgraphId {
    node.runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap()
}

fn diamond(node: &TestNode, gated: bool) -> SubgraphDefinition {
    let mut def = SubgraphDefinition::new();
    let tasks: Vec<OpKey> = (0..5)
        .map(|i| def.add_task(TaskOp::new(node.proc(i % 2), RECORD, tagged(i, 0))))
        .collect();
    for (src, tgt) in EDGES {
        def.depend(tasks[src], tasks[tgt]);
    }
    if gated {
        def.depend(OpKey::ext_precondition(0), tasks[0]);
    }
    def
}

fn assert_diamond_order(order: &[u32]) {
    for (src, tgt) in EDGES {
        assert!(
            position(order, src as u32) < position(order, tgt as u32),
            "{order:?}"
        );
    }
}

#[test]
fn replay_runs_each_instance_in_dependency_order() {
    let node = TestNode::new(ReplayMode::Persistent);
    let id = create(&node, diamond(&node, true));
    assert!(node.runtime.compiled(id).unwrap().is_replayable());

    let mut previous = Event::NO_EVENT;
    let mut gates = Vec::new();
    for _ in 0..3 {
        let gate = node.events.create();
        previous = node
            .runtime
            .instantiate_with_conditions(
                id,
                &[],
                &ProfilingRequestSet::new(),
                &[gate],
                &mut [],
                previous,
                0,
            )
            .unwrap();
        gates.push(gate);
    }
    std::thread::sleep(Duration::from_millis(50));
    assert!(node.log.lock().is_empty());

    for gate in gates {
        node.events.trigger(gate, false);
    }
    assert!(!node.wait(previous));

    let order = node.tags();
    assert_eq!(order.len(), 15);
    for round in order.chunks(5) {
        assert_diamond_order(round);
    }
    let metrics = node.runtime.metrics();
    assert_eq!(metrics.persistent_instantiations, 3);
    assert_eq!(metrics.classic_instantiations, 0);
}

#[test]
fn concurrent_instances_all_complete() {
    let node = TestNode::new(ReplayMode::Persistent);
    let id = create(&node, diamond(&node, false));

    let finishes: Vec<Event> = (0..8)
        .map(|_| {
            node.runtime
                .instantiate(id, &[], &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
                .unwrap()
        })
        .collect();
    for finish in finishes {
        assert!(!node.wait(finish));
    }
    assert_eq!(node.log.lock().len(), 40);
}

#[test]
fn replayed_arrivals_use_interpolated_barrier_and_value() {
    let node = TestNode::new(ReplayMode::Persistent);
    let barrier = node.barriers.create_reduction_barrier(
        1,
        Arc::new(FnReduction::i32_add()),
        0i32.to_le_bytes().to_vec(),
    );

    let mut def = SubgraphDefinition::new();
    let task = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(1, 0)));
    let arrival = def.add_arrival(ArrivalOp {
        barrier: Barrier::NO_BARRIER,
        count: 1,
        reduce_value: vec![0; 4],
    });
    def.depend(task, arrival);
    def.interpolate(Interpolation::overwrite(
        0,
        16,
        InterpolationTarget::ArrivalBarrier,
        arrival.index,
        0,
    ));
    def.interpolate(Interpolation::overwrite(
        16,
        4,
        InterpolationTarget::ArrivalValue,
        arrival.index,
        0,
    ));
    let id = create(&node, def);

    let mut current = barrier;
    for value in [5i32, 11] {
        let mut args = current.to_bytes().to_vec();
        args.extend_from_slice(&value.to_le_bytes());
        let finish = node
            .runtime
            .instantiate(id, &args, &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
            .unwrap();
        assert!(!node.wait(finish));
        assert!(!node.wait(node.barriers.generation_event(current)));
        assert_eq!(
            node.barriers.result(current).unwrap(),
            value.to_le_bytes().to_vec()
        );
        current = node.barriers.advance(current);
    }
    assert_eq!(node.runtime.metrics().persistent_instantiations, 2);
}

#[test]
fn replay_start_waits_for_wait_on() {
    let node = TestNode::new(ReplayMode::Persistent);
    let id = create(&node, diamond(&node, false));

    let start = node.events.create();
    let finish = node
        .runtime
        .instantiate(id, &[], &ProfilingRequestSet::new(), start, 0)
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(node.log.lock().is_empty());

    node.events.trigger(start, false);
    assert!(!node.wait(finish));
    assert_diamond_order(&node.tags());
}

#[test]
fn poisoned_wait_on_taints_replay_finish() {
    let node = TestNode::new(ReplayMode::Persistent);
    let id = create(&node, diamond(&node, false));

    let start = node.events.create();
    let finish = node
        .runtime
        .instantiate(id, &[], &ProfilingRequestSet::new(), start, 0)
        .unwrap();
    node.events.trigger(start, true);
    assert!(node.wait(finish));
}

#[test]
fn failed_replayed_task_poisons_finish() {
    let node = TestNode::new(ReplayMode::Persistent);
    let mut def = SubgraphDefinition::new();
    let ok = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(1, 0)));
    let bad = def.add_task(TaskOp::new(node.proc(1), FAIL, Vec::new()));
    def.depend(ok, bad);
    let id = create(&node, def);

    let finish = node
        .runtime
        .instantiate(id, &[], &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
        .unwrap();
    assert!(node.wait(finish));
    assert_eq!(node.tags(), vec![1]);
}

#[test]
fn unsupported_schedules_fall_back_to_classic() {
    for mode in [ReplayMode::Persistent, ReplayMode::Auto] {
        let node = TestNode::new(mode);

        let replayable = create(&node, diamond(&node, false));
        let src = node.copies.create_region(2);
        let dst = node.copies.create_region(2);
        let mut def = SubgraphDefinition::new();
        let task = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(9, 0)));
        let copy = def.add_copy(CopyOp {
            desc: CopyDesc {
                src,
                src_offset: 0,
                dst,
                dst_offset: 0,
                bytes: 2,
            },
            priority: 0,
            profiling: ProfilingRequestSet::new(),
        });
        def.depend(task, copy);
        let classic = create(&node, def);
        assert!(!node.runtime.compiled(classic).unwrap().is_replayable());

        for id in [replayable, classic] {
            let finish = node
                .runtime
                .instantiate(id, &[], &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
                .unwrap();
            assert!(!node.wait(finish));
        }

        let metrics = node.runtime.metrics();
        assert_eq!(metrics.persistent_instantiations, 1, "{mode}");
        assert_eq!(metrics.classic_instantiations, 1, "{mode}");
    }
}

#[test]
fn classic_mode_never_replays() {
    let node = TestNode::new(ReplayMode::Classic);
    let id = create(&node, diamond(&node, false));
    assert!(node.runtime.compiled(id).unwrap().is_replayable());

    let finish = node
        .runtime
        .instantiate(id, &[], &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
        .unwrap();
    assert!(!node.wait(finish));
    assert_eq!(node.runtime.metrics().persistent_instantiations, 0);
}

/// A local task followed by one on a processor of node 9.
fn spans_foreign_processor(node: &TestNode) -> SubgraphDefinition {
    let mut def = SubgraphDefinition::new();
    let local = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(1, 0)));
    let remote = def.add_task(TaskOp::new(
        ProcessorId::new(NodeId(9), 0),
        RECORD,
        tagged(2, 0),
    ));
    def.depend(local, remote);
    def
}

#[test]
fn schedules_spanning_nodes_are_not_replayed() {
    for mode in [ReplayMode::Persistent, ReplayMode::Auto] {
        let node = TestNode::new(mode);
        let id = create(&node, spans_foreign_processor(&node));
        assert!(!node.runtime.compiled(id).unwrap().is_replayable(), "{mode}");

        let finish = node
            .runtime
            .instantiate(id, &[], &ProfilingRequestSet::new(), Event::NO_EVENT, 0)
            .unwrap();
        assert!(node.wait(finish), "{mode}");

        let start = node.events.create();
        let deferred = node
            .runtime
            .instantiate(id, &[], &ProfilingRequestSet::new(), start, 0)
            .unwrap();
        node.events.trigger(start, false);
        assert!(node.wait(deferred), "{mode}");

        assert_eq!(node.tags(), vec![1, 1], "{mode}");
        let metrics = node.runtime.metrics();
        assert_eq!(metrics.classic_instantiations, 2, "{mode}");
        assert_eq!(metrics.persistent_instantiations, 0, "{mode}");
    }
}

#[test]
fn foreign_partitions_run_on_the_classic_path() {
    let node = TestNode::new(ReplayMode::Auto);
    let mut def = SubgraphDefinition::new();
    def.add_task(TaskOp::new(ProcessorId::new(NodeId(9), 0), RECORD, tagged(3, 0)));
    let id = create(&node, def);
    // replayable in itself, but not by this node
    assert!(node.runtime.compiled(id).unwrap().is_replayable());

    let start = node.events.create();
    let finish = node
        .runtime
        .instantiate(id, &[], &ProfilingRequestSet::new(), start, 0)
        .unwrap();
    node.events.trigger(start, false);
    assert!(node.wait(finish));
    assert!(node.log.lock().is_empty());
    assert_eq!(node.runtime.metrics().persistent_instantiations, 0);
    assert_eq!(node.runtime.metrics().classic_instantiations, 1);
}
