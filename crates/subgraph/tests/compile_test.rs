//! Integration tests for graph compilation through the runtime.

mod common;

use weave_core::{Barrier, Event, ProfilingRequestSet};
use weave_subgraph::compiler::PreconditionSource;
use weave_subgraph::{
    ArrivalOp, OpKey, ReplayMode, SubgraphDefinition, SubgraphError, TaskOp,
};

use common::{tagged, TestNode, RECORD};

fn diamond_plus(node: &TestNode) -> (SubgraphDefinition, Vec<OpKey>, OpKey) {
    let mut def = SubgraphDefinition::new();
    let tasks: Vec<OpKey> = (0..5)
        .map(|i| def.add_task(TaskOp::new(node.proc(i % 2), RECORD, tagged(i, 0))))
        .collect();
    let arrival = def.add_arrival(ArrivalOp {
        barrier: node.barriers.create_barrier(1),
        count: 1,
        reduce_value: Vec::new(),
    });
    for (src, tgt) in [(0, 1), (0, 2), (1, 3), (2, 3), (0, 3), (1, 2), (1, 4)] {
        def.depend(tasks[src], tasks[tgt]);
    }
    def.depend(OpKey::ext_precondition(0), tasks[0]);
    (def, tasks, arrival)
}

#[test]
fn diamond_plus_compiles_to_expected_schedule() {
    let node = TestNode::new(ReplayMode::Classic);
    let (def, tasks, arrival) = diamond_plus(&node);
    let id = node
        .runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap();
    let compiled = node.runtime.compiled(id).unwrap();

    assert_eq!(compiled.schedule.len(), 6);
    assert_eq!(compiled.num_external_preconditions, 1);
    assert_eq!(compiled.num_external_postconditions, 0);

    let first = compiled.entry(tasks[0]).unwrap();
    assert_eq!(first.preconditions.len(), 1);
    assert_eq!(first.preconditions[0].source, PreconditionSource::External(0));

    let join = compiled.entry(tasks[3]).unwrap();
    assert_eq!(join.preconditions.len(), 3);
    assert!(join
        .preconditions
        .iter()
        .all(|p| matches!(p.source, PreconditionSource::Intermediate(_))));
    assert_eq!(compiled.max_preconditions, 4);

    let finals: Vec<OpKey> = compiled
        .schedule
        .iter()
        .filter(|e| e.is_final)
        .map(|e| e.key)
        .collect();
    assert_eq!(compiled.num_final_events, 3);
    assert_eq!(finals.len(), 3);
    for key in [tasks[3], tasks[4], arrival] {
        assert!(finals.contains(&key), "{key} should be final");
    }

    // Task-only graphs on this node's processors replay; arrivals too.
    assert!(compiled.is_replayable());
}

#[test]
fn diamond_plus_respects_every_edge() {
    let node = TestNode::new(ReplayMode::Classic);
    let (def, _, _) = diamond_plus(&node);
    let edges: Vec<(OpKey, OpKey)> = def
        .dependencies
        .iter()
        .filter(|d| !d.src.kind.is_external())
        .map(|d| (d.src, d.tgt))
        .collect();
    let id = node
        .runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap();
    let compiled = node.runtime.compiled(id).unwrap();
    for (src, tgt) in edges {
        assert!(compiled.position(src).unwrap() < compiled.position(tgt).unwrap());
    }
}

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn random_dags_are_ordered_topologically() {
    let node = TestNode::new(ReplayMode::Classic);
    let mut rng = Lcg(7);
    for round in 0..25 {
        let n = 2 + rng.next(14) as usize;

        // A random rank per task; edges only go from lower to higher rank so
        // the graph is acyclic while insertion order says nothing.
        let mut rank: Vec<usize> = (0..n).collect();
        for i in (1..n).rev() {
            let j = rng.next(i as u64 + 1) as usize;
            rank.swap(i, j);
        }
        let mut def = SubgraphDefinition::new();
        let tasks: Vec<OpKey> = (0..n)
            .map(|i| def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(i as u32, 0))))
            .collect();
        let mut edges = Vec::new();
        for a in 0..n {
            for b in 0..n {
                if rank[a] < rank[b] && rng.next(3) == 0 {
                    def.depend(tasks[a], tasks[b]);
                    edges.push((tasks[a], tasks[b]));
                }
            }
        }

        let id = node
            .runtime
            .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
            .unwrap_or_else(|e| panic!("round {round}: {e}"));
        let compiled = node.runtime.compiled(id).unwrap();
        assert_eq!(compiled.schedule.len(), n);
        for (src, tgt) in edges {
            assert!(
                compiled.position(src).unwrap() < compiled.position(tgt).unwrap(),
                "round {round}: {src} must precede {tgt}"
            );
        }
        node.runtime.destroy(id, Event::NO_EVENT).unwrap();
    }
    assert_eq!(node.runtime.live_subgraphs(), 0);
}

#[test]
fn cycles_are_reported_not_compiled() {
    let node = TestNode::new(ReplayMode::Classic);

    let mut def = SubgraphDefinition::new();
    let a = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(0, 0)));
    let b = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(1, 0)));
    let c = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(2, 0)));
    def.depend(a, b).depend(b, c).depend(c, a);
    let err = node
        .runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap_err();
    assert!(matches!(err, SubgraphError::Cycle { .. }), "{err}");

    let mut def = SubgraphDefinition::new();
    let a = def.add_task(TaskOp::new(node.proc(0), RECORD, tagged(0, 0)));
    def.depend(a, a);
    let err = node
        .runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap_err();
    assert!(matches!(err, SubgraphError::Cycle { .. }), "{err}");

    let metrics = node.runtime.metrics();
    assert_eq!(metrics.compile_failures, 2);
    assert_eq!(metrics.created, 0);
    assert_eq!(node.runtime.live_subgraphs(), 0);
}

#[test]
fn arrival_with_unknown_barrier_still_compiles() {
    let node = TestNode::new(ReplayMode::Classic);
    let mut def = SubgraphDefinition::new();
    def.add_arrival(ArrivalOp {
        barrier: Barrier::NO_BARRIER,
        count: 1,
        reduce_value: Vec::new(),
    });
    let id = node
        .runtime
        .create(def, &ProfilingRequestSet::new(), Event::NO_EVENT)
        .unwrap();
    let compiled = node.runtime.compiled(id).unwrap();
    assert_eq!(compiled.num_final_events, 1);
    // Arrivals alone give the partition nothing to run on.
    assert!(!compiled.is_replayable());
}
