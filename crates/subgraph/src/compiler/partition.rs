//! Per-processor partition of a compiled schedule, used by persistent replay.
//!
//! Operations are grouped by the processor that runs them and addressed as
//! `(processor, local index)`. All per-operation data lives in flat arrays
//! indexed through `operation_offsets` (CSR layout):
//!
//! ```text
//! flat(p, i) = operation_offsets[p] + i
//! successors(flat) = completions[completion_offsets[flat]..completion_offsets[flat + 1]]
//! ```

use std::collections::HashMap;
use std::ops::Range;

use serde::Serialize;
use weave_core::ProcessorId;

use crate::definition::{OpKey, OpKind, SubgraphDefinition};
use crate::policy::ArrivalPlacement;

use super::ScheduleEntry;

/// An operation addressed by its processor slot and local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CompletionTarget {
    pub proc: u32,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct ReplayPartition {
    /// Distinct processors in first-seen schedule order.
    pub procs: Vec<ProcessorId>,
    /// `procs.len() + 1` offsets into the flat operation arrays.
    pub operation_offsets: Vec<usize>,
    pub operations: Vec<OpKey>,
    /// Interpolation rule range of each flat operation.
    pub interp_ranges: Vec<Range<usize>>,
    pub completion_offsets: Vec<usize>,
    pub completions: Vec<CompletionTarget>,
    /// Initial precondition counter of each flat operation: one per incoming
    /// edge, external ones included.
    pub precondition_counts: Vec<i32>,
    pub external_offsets: Vec<usize>,
    pub external_targets: Vec<CompletionTarget>,
}

impl ReplayPartition {
    /// Whether a definition can run under persistent replay: tasks and
    /// arrivals only, no external postconditions, at least one task, and
    /// every task on the same node.
    pub fn supports(def: &SubgraphDefinition, num_external_postconditions: usize) -> bool {
        let Some(first) = def.tasks.first() else {
            return false;
        };
        def.tasks.iter().all(|t| t.proc.node == first.proc.node)
            && def.copies.is_empty()
            && def.instantiations.is_empty()
            && def.acquires.is_empty()
            && def.releases.is_empty()
            && num_external_postconditions == 0
    }

    pub(crate) fn build(
        def: &SubgraphDefinition,
        schedule: &[ScheduleEntry],
        num_external_preconditions: usize,
        placement: &dyn ArrivalPlacement,
    ) -> Self {
        let mut procs: Vec<ProcessorId> = Vec::new();
        for entry in schedule.iter().filter(|e| e.key.kind == OpKind::Task) {
            let proc = def.tasks[entry.key.index as usize].proc;
            if !procs.contains(&proc) {
                procs.push(proc);
            }
        }

        // processor slot of every schedule entry, in schedule order
        let mut local_lists: Vec<Vec<usize>> = vec![Vec::new(); procs.len()];
        let mut location: HashMap<OpKey, CompletionTarget> = HashMap::new();
        let mut nth_arrival = 0;
        for (pos, entry) in schedule.iter().enumerate() {
            let slot = match entry.key.kind {
                OpKind::Task => {
                    let proc = def.tasks[entry.key.index as usize].proc;
                    procs.iter().position(|p| *p == proc).unwrap_or_default()
                }
                OpKind::Arrival => {
                    let slot = placement.place(nth_arrival, &procs);
                    nth_arrival += 1;
                    slot
                }
                _ => continue,
            };
            location.insert(
                entry.key,
                CompletionTarget {
                    proc: slot as u32,
                    index: local_lists[slot].len() as u32,
                },
            );
            local_lists[slot].push(pos);
        }

        let mut operation_offsets = Vec::with_capacity(procs.len() + 1);
        let mut operations = Vec::new();
        let mut interp_ranges = Vec::new();
        operation_offsets.push(0);
        for list in &local_lists {
            for &pos in list {
                operations.push(schedule[pos].key);
                interp_ranges.push(schedule[pos].interps.clone());
            }
            operation_offsets.push(operations.len());
        }

        let flat_of = |t: CompletionTarget| operation_offsets[t.proc as usize] + t.index as usize;
        let mut successors: Vec<Vec<CompletionTarget>> = vec![Vec::new(); operations.len()];
        let mut precondition_counts = vec![0i32; operations.len()];
        let mut external: Vec<Vec<CompletionTarget>> = vec![Vec::new(); num_external_preconditions];

        for dep in &def.dependencies {
            let Some(&target) = location.get(&dep.tgt) else {
                continue;
            };
            precondition_counts[flat_of(target)] += 1;
            if dep.src.kind == OpKind::ExtPrecondition {
                external[dep.src.index as usize].push(target);
            } else if let Some(&source) = location.get(&dep.src) {
                successors[flat_of(source)].push(target);
            }
        }

        let (completion_offsets, completions) = flatten(successors);
        let (external_offsets, external_targets) = flatten(external);

        Self {
            procs,
            operation_offsets,
            operations,
            interp_ranges,
            completion_offsets,
            completions,
            precondition_counts,
            external_offsets,
            external_targets,
        }
    }

    pub fn num_procs(&self) -> usize {
        self.procs.len()
    }

    /// Flat range of the operations owned by processor slot `proc`.
    pub fn ops_of(&self, proc: usize) -> Range<usize> {
        self.operation_offsets[proc]..self.operation_offsets[proc + 1]
    }

    pub fn flat_index(&self, target: CompletionTarget) -> usize {
        self.operation_offsets[target.proc as usize] + target.index as usize
    }

    pub fn successors(&self, flat: usize) -> &[CompletionTarget] {
        &self.completions[self.completion_offsets[flat]..self.completion_offsets[flat + 1]]
    }

    /// Operations gated directly on external precondition `index`.
    pub fn external_fanout(&self, index: usize) -> &[CompletionTarget] {
        match self.external_offsets.get(index + 1) {
            Some(&end) => &self.external_targets[self.external_offsets[index]..end],
            None => &[],
        }
    }

    pub fn num_external_preconditions(&self) -> usize {
        self.external_offsets.len().saturating_sub(1)
    }
}

fn flatten(lists: Vec<Vec<CompletionTarget>>) -> (Vec<usize>, Vec<CompletionTarget>) {
    let mut offsets = Vec::with_capacity(lists.len() + 1);
    let mut flat = Vec::with_capacity(lists.iter().map(Vec::len).sum());
    offsets.push(0);
    for list in lists {
        flat.extend(list);
        offsets.push(flat.len());
    }
    (offsets, flat)
}
