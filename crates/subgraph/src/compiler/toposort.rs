//! Rank relaxation over the dependency edges.
//!
//! Every scheduled operation starts with a rank in declaration order, grouped
//! by kind. Each pass bumps the rank of any target that does not sit strictly
//! after its source; a graph that still moves after `total_ops` passes has a
//! cycle. Ranks are then compacted into a dense order.

use tracing::trace;

use crate::definition::{OpKey, OpKind, SubgraphDefinition};
use crate::error::{Result, SubgraphError};

/// Dense numbering of the scheduled operations: kind blocks in seeding order.
pub(crate) struct FlatIndex {
    bases: [usize; OpKind::SCHEDULED.len()],
    total: usize,
}

impl FlatIndex {
    pub(crate) fn new(def: &SubgraphDefinition) -> Self {
        let mut bases = [0; OpKind::SCHEDULED.len()];
        let mut total = 0;
        for (slot, kind) in OpKind::SCHEDULED.iter().enumerate() {
            bases[slot] = total;
            total += def.count(*kind);
        }
        Self { bases, total }
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Flat index of a scheduled (non-external) key.
    pub(crate) fn of(&self, key: OpKey) -> usize {
        let slot = OpKind::SCHEDULED
            .iter()
            .position(|k| *k == key.kind)
            .unwrap_or_else(|| panic!("{key} is not a scheduled operation"));
        self.bases[slot] + key.index as usize
    }

    pub(crate) fn key(&self, flat: usize) -> OpKey {
        // empty kinds share their base with the next kind, so the last base
        // not past `flat` belongs to a non-empty block
        let slot = self.bases.partition_point(|base| *base <= flat) - 1;
        OpKey::new(OpKind::SCHEDULED[slot], (flat - self.bases[slot]) as u32)
    }
}

/// Scheduled operations in topological order (external markers excluded).
pub(crate) fn topological_order(def: &SubgraphDefinition) -> Result<Vec<OpKey>> {
    let flat = FlatIndex::new(def);
    let total = flat.total();

    let edges: Vec<(usize, usize)> = def
        .dependencies
        .iter()
        .filter(|d| !d.src.kind.is_external() && !d.tgt.kind.is_external())
        .map(|d| (flat.of(d.src), flat.of(d.tgt)))
        .collect();

    let mut ranks: Vec<usize> = (0..total).collect();
    let mut next_rank = total;
    let passes = total.max(1);
    let mut converged = false;

    for pass in 0..passes {
        converged = true;
        for &(src, tgt) in &edges {
            if ranks[src] >= ranks[tgt] {
                ranks[tgt] = next_rank;
                next_rank += 1;
                converged = false;
            }
        }
        if converged {
            trace!(pass, total, "ranks converged");
            break;
        }
    }
    if !converged {
        return Err(SubgraphError::Cycle { passes });
    }

    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by_key(|&i| ranks[i]);
    Ok(order.into_iter().map(|i| flat.key(i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ArrivalOp, TaskOp};
    use weave_core::{Barrier, NodeId, ProcessorId, TaskFuncId};

    fn tasks(n: usize) -> SubgraphDefinition {
        let mut def = SubgraphDefinition::new();
        for _ in 0..n {
            def.add_task(TaskOp::new(ProcessorId::new(NodeId(0), 0), TaskFuncId(1), vec![]));
        }
        def
    }

    fn arrival() -> ArrivalOp {
        ArrivalOp {
            barrier: Barrier::NO_BARRIER,
            count: 1,
            reduce_value: vec![],
        }
    }

    #[test]
    fn flat_index_round_trips_with_empty_kinds() {
        let mut def = tasks(2);
        def.add_arrival(arrival());
        let flat = FlatIndex::new(&def);
        assert_eq!(flat.total(), 3);
        assert_eq!(flat.of(OpKey::arrival(0)), 2);
        assert_eq!(flat.key(0), OpKey::task(0));
        assert_eq!(flat.key(1), OpKey::task(1));
        assert_eq!(flat.key(2), OpKey::arrival(0));
    }

    #[test]
    fn unconstrained_ops_keep_declaration_order() {
        let mut def = tasks(2);
        def.add_arrival(arrival());
        let order = topological_order(&def).unwrap();
        assert_eq!(order, vec![OpKey::task(0), OpKey::task(1), OpKey::arrival(0)]);
    }

    #[test]
    fn backwards_edge_moves_target_later() {
        let mut def = tasks(3);
        def.depend(OpKey::task(2), OpKey::task(0));
        let order = topological_order(&def).unwrap();
        assert_eq!(order, vec![OpKey::task(1), OpKey::task(2), OpKey::task(0)]);
    }

    #[test]
    fn two_cycle_is_rejected() {
        let mut def = tasks(2);
        def.depend(OpKey::task(0), OpKey::task(1));
        def.depend(OpKey::task(1), OpKey::task(0));
        assert!(matches!(
            topological_order(&def),
            Err(SubgraphError::Cycle { passes: 2 })
        ));
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut def = tasks(1);
        def.depend(OpKey::task(0), OpKey::task(0));
        assert!(matches!(topological_order(&def), Err(SubgraphError::Cycle { .. })));
    }

    #[test]
    fn empty_definition_converges() {
        assert!(topological_order(&SubgraphDefinition::new()).unwrap().is_empty());
    }
}
