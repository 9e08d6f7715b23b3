//! Graph compiler: turns a [`SubgraphDefinition`] into an immutable
//! [`CompiledSubgraph`].
//!
//! Compilation runs synchronously and either yields a complete schedule or an
//! error; nothing partial is ever published.
//!
//! Steps:
//! 1. validate keys, ports and interpolation targets
//! 2. rank operations topologically ([`toposort`]) and append external
//!    postcondition markers
//! 3. reserve intermediate events per entry and attach preconditions,
//!    pruning entries whose completion is subsumed by a later operation
//! 4. sort interpolation rules into per-operation ranges and resolve
//!    reduction operators
//! 5. build the per-processor [`ReplayPartition`] when the schedule is
//!    replayable

pub mod partition;
pub(crate) mod toposort;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;
use weave_core::ReductionRegistry;

use crate::definition::{Dependency, OpKey, OpKind, SubgraphDefinition};
use crate::error::{Result, SubgraphError};
use crate::interpolation::{rule_range, sort_rules, Interpolator, ReductionTable};
use crate::policy::ArrivalPlacement;

pub use partition::{CompletionTarget, ReplayPartition};

/// Where a precondition event comes from.
///
/// Ordering puts external sources first so sorted precondition lists are
/// stable across compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreconditionSource {
    /// The caller's precondition at this index.
    External(u32),
    /// An intermediate event slot produced by an earlier entry.
    Intermediate(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Precondition {
    pub port: u32,
    pub source: PreconditionSource,
}

/// One step of the compiled schedule.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub key: OpKey,
    /// Sorted by `(port, source)`, deduplicated.
    pub preconditions: Vec<Precondition>,
    /// Range into the compiled interpolation rules.
    pub interps: Range<usize>,
    /// First intermediate event slot this entry fills.
    pub event_base: usize,
    /// Slots filled: 0 for external postconditions, one per output port for
    /// instantiations, 1 otherwise.
    pub event_count: usize,
    /// Whether the completion feeds the caller's finish event.
    pub is_final: bool,
}

impl ScheduleEntry {
    /// Preconditions on input port 0.
    pub fn port0(&self) -> &[Precondition] {
        let end = self.preconditions.partition_point(|p| p.port == 0);
        &self.preconditions[..end]
    }

    /// Preconditions on input port `port`.
    pub fn on_port(&self, port: u32) -> impl Iterator<Item = &Precondition> {
        self.preconditions.iter().filter(move |p| p.port == port)
    }

    /// Highest input port referenced, 0 when none.
    pub fn max_port(&self) -> u32 {
        self.preconditions.last().map_or(0, |p| p.port)
    }
}

/// Immutable result of compilation, shared by every instantiation.
#[derive(Debug)]
pub struct CompiledSubgraph {
    /// The definition with interpolation rules sorted by target.
    pub definition: SubgraphDefinition,
    pub schedule: Vec<ScheduleEntry>,
    pub num_intermediate_events: usize,
    pub num_final_events: usize,
    pub max_preconditions: usize,
    pub num_external_preconditions: usize,
    pub num_external_postconditions: usize,
    pub reductions: ReductionTable,
    pub partition: Option<Arc<ReplayPartition>>,
    positions: HashMap<OpKey, usize>,
}

impl CompiledSubgraph {
    /// Schedule position of `key`, if it was compiled.
    pub fn position(&self, key: OpKey) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    pub fn entry(&self, key: OpKey) -> Option<&ScheduleEntry> {
        self.position(key).map(|pos| &self.schedule[pos])
    }

    pub fn is_replayable(&self) -> bool {
        self.partition.is_some()
    }

    pub fn interpolator(&self, rules: Range<usize>) -> Interpolator<'_> {
        Interpolator::new(&self.definition.interpolations[rules], &self.reductions)
    }
}

/// Compile `definition`.
pub fn compile(
    definition: SubgraphDefinition,
    reductions: &ReductionRegistry,
    placement: &dyn ArrivalPlacement,
) -> Result<CompiledSubgraph> {
    let mut definition = definition;
    validate(&definition)?;

    let mut order = toposort::topological_order(&definition)?;
    let num_external_postconditions = definition
        .dependencies
        .iter()
        .filter(|d| d.tgt.kind == OpKind::ExtPostcondition)
        .map(|d| d.tgt.index as usize + 1)
        .max()
        .unwrap_or(0);
    order.extend((0..num_external_postconditions as u32).map(OpKey::ext_postcondition));
    let num_external_preconditions = definition
        .dependencies
        .iter()
        .filter(|d| d.src.kind == OpKind::ExtPrecondition)
        .map(|d| d.src.index as usize + 1)
        .max()
        .unwrap_or(0);

    let positions: HashMap<OpKey, usize> =
        order.iter().enumerate().map(|(pos, key)| (*key, pos)).collect();

    let mut schedule = Vec::with_capacity(order.len());
    let mut next_event = 0;
    for key in order {
        let event_count = match key.kind {
            OpKind::ExtPostcondition => 0,
            OpKind::Instantiation => outputs_of(&definition.dependencies, key),
            _ => 1,
        };
        schedule.push(ScheduleEntry {
            key,
            preconditions: Vec::new(),
            interps: 0..0,
            event_base: next_event,
            event_count,
            is_final: key.kind != OpKind::ExtPostcondition,
        });
        next_event += event_count;
    }
    let num_intermediate_events = next_event;

    for dep in &definition.dependencies {
        let source = if dep.src.kind == OpKind::ExtPrecondition {
            PreconditionSource::External(dep.src.index)
        } else {
            let src = &mut schedule[positions[&dep.src]];
            if dep.src_port == 0 && dep.tgt.kind != OpKind::ExtPostcondition {
                src.is_final = false;
            }
            PreconditionSource::Intermediate(src.event_base + dep.src_port as usize)
        };
        schedule[positions[&dep.tgt]].preconditions.push(Precondition {
            port: dep.tgt_port,
            source,
        });
    }

    let mut max_unique = 0;
    for entry in &mut schedule {
        entry.preconditions.sort_unstable();
        entry.preconditions.dedup();
        max_unique = max_unique.max(entry.preconditions.len());
    }
    // room for the start event on top of the widest entry
    let max_preconditions = (max_unique + 1).max(1);
    let num_final_events = schedule.iter().filter(|e| e.is_final).count();

    sort_rules(&mut definition.interpolations);
    for entry in &mut schedule {
        entry.interps = rule_range(&definition.interpolations, entry.key);
    }
    let reductions = ReductionTable::resolve(&definition.interpolations, reductions)?;

    let partition = ReplayPartition::supports(&definition, num_external_postconditions).then(|| {
        Arc::new(ReplayPartition::build(
            &definition,
            &schedule,
            num_external_preconditions,
            placement,
        ))
    });

    debug!(
        entries = schedule.len(),
        intermediate_events = num_intermediate_events,
        final_events = num_final_events,
        max_preconditions,
        external_pre = num_external_preconditions,
        external_post = num_external_postconditions,
        interpolations = definition.interpolations.len(),
        replay_procs = partition.as_ref().map_or(0, |p| p.num_procs()),
        "compiled subgraph"
    );

    Ok(CompiledSubgraph {
        definition,
        schedule,
        num_intermediate_events,
        num_final_events,
        max_preconditions,
        num_external_preconditions,
        num_external_postconditions,
        reductions,
        partition,
        positions,
    })
}

/// Output slots of a nested instantiation: one past the highest source port
/// used on its outgoing edges.
fn outputs_of(deps: &[Dependency], key: OpKey) -> usize {
    deps.iter()
        .filter(|d| d.src == key)
        .map(|d| d.src_port as usize)
        .max()
        .unwrap_or(0)
        + 1
}

fn validate(def: &SubgraphDefinition) -> Result<()> {
    for dep in &def.dependencies {
        if dep.src.kind == OpKind::ExtPostcondition {
            return Err(SubgraphError::InvalidDependency {
                src: dep.src,
                tgt: dep.tgt,
                reason: "an external postcondition cannot be a source",
            });
        }
        if dep.tgt.kind == OpKind::ExtPrecondition {
            return Err(SubgraphError::InvalidDependency {
                src: dep.src,
                tgt: dep.tgt,
                reason: "an external precondition cannot be a target",
            });
        }
        for (key, port) in [(dep.src, dep.src_port), (dep.tgt, dep.tgt_port)] {
            check_key(def, key)?;
            if port != 0 && key.kind != OpKind::Instantiation {
                return Err(SubgraphError::InvalidPort { key, port });
            }
        }
    }

    for rule in &def.interpolations {
        let len = def.count(rule.target.op_kind());
        if rule.target_index as usize >= len {
            return Err(SubgraphError::InterpolationTargetOutOfRange {
                target: rule.target,
                index: rule.target_index,
                len,
            });
        }
    }
    Ok(())
}

fn check_key(def: &SubgraphDefinition, key: OpKey) -> Result<()> {
    match def.operation(key) {
        Some(_) => Ok(()),
        None => Err(SubgraphError::OpIndexOutOfRange {
            key,
            len: def.count(key.kind),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ArrivalOp, InstantiationOp, Interpolation, InterpolationTarget, TaskOp};
    use crate::policy::RoundRobinPlacement;
    use crate::runtime::SubgraphId;
    use weave_core::{Barrier, NodeId, ProcessorId, ReductionOpId, TaskFuncId};

    fn task_on(proc: u32) -> TaskOp {
        TaskOp::new(ProcessorId::new(NodeId(0), proc), TaskFuncId(1), vec![0; 8])
    }

    fn run(def: SubgraphDefinition) -> Result<CompiledSubgraph> {
        compile(def, &ReductionRegistry::new(), &RoundRobinPlacement)
    }

    #[test]
    fn chain_has_single_final_event() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        let b = def.add_task(task_on(0));
        let c = def.add_task(task_on(0));
        def.depend(a, b).depend(b, c);

        let compiled = run(def).unwrap();
        assert_eq!(compiled.num_final_events, 1);
        assert!(compiled.entry(c).unwrap().is_final);
        assert!(!compiled.entry(a).unwrap().is_final);
        assert_eq!(compiled.max_preconditions, 2);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        let b = def.add_task(task_on(0));
        def.depend(a, b).depend(a, b);
        let compiled = run(def).unwrap();
        assert_eq!(compiled.entry(b).unwrap().preconditions.len(), 1);
    }

    #[test]
    fn ext_postcondition_does_not_clear_final() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        def.depend(a, OpKey::ext_postcondition(1));
        let compiled = run(def).unwrap();

        assert_eq!(compiled.num_external_postconditions, 2);
        assert_eq!(compiled.schedule.len(), 3);
        assert_eq!(compiled.schedule[1].key, OpKey::ext_postcondition(0));
        assert_eq!(compiled.schedule[2].event_count, 0);
        assert!(!compiled.schedule[2].is_final);
        assert!(compiled.entry(a).unwrap().is_final);
        assert!(compiled.partition.is_none());
    }

    #[test]
    fn instantiation_reserves_one_slot_per_output_port() {
        let mut def = SubgraphDefinition::new();
        let nested = def.add_instantiation(InstantiationOp {
            subgraph: SubgraphId::new(NodeId(0), 0, 0),
            args: vec![],
            priority_adjust: 0,
            profiling: Default::default(),
        });
        let t = def.add_task(task_on(0));
        def.add_dependency(Dependency::new(nested, t).from_port(2));

        let compiled = run(def).unwrap();
        let entry = compiled.entry(nested).unwrap();
        assert_eq!(entry.event_count, 3);
        assert_eq!(compiled.num_intermediate_events, 4);
        // port 2 leaves the instantiation's own finish slot final
        assert!(entry.is_final);
        let src = compiled.entry(t).unwrap().preconditions[0].source;
        assert_eq!(src, PreconditionSource::Intermediate(entry.event_base + 2));
    }

    #[test]
    fn non_instantiation_ports_are_rejected() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        let b = def.add_task(task_on(0));
        def.add_dependency(Dependency::new(a, b).to_port(1));
        assert!(matches!(
            run(def),
            Err(SubgraphError::InvalidPort { port: 1, .. })
        ));
    }

    #[test]
    fn out_of_range_keys_are_rejected() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        def.depend(a, OpKey::task(4));
        assert!(matches!(
            run(def),
            Err(SubgraphError::OpIndexOutOfRange { len: 1, .. })
        ));
    }

    #[test]
    fn external_markers_in_wrong_position_are_rejected() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        def.depend(a, OpKey::ext_precondition(0));
        assert!(matches!(run(def), Err(SubgraphError::InvalidDependency { .. })));

        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        def.depend(OpKey::ext_postcondition(0), a);
        assert!(matches!(run(def), Err(SubgraphError::InvalidDependency { .. })));
    }

    #[test]
    fn interpolation_target_must_exist() {
        let mut def = SubgraphDefinition::new();
        def.add_task(task_on(0));
        def.interpolate(Interpolation::overwrite(0, 1, InterpolationTarget::ArrivalValue, 0, 0));
        assert!(matches!(
            run(def),
            Err(SubgraphError::InterpolationTargetOutOfRange { len: 0, .. })
        ));
    }

    #[test]
    fn missing_reduction_fails_compile() {
        let mut def = SubgraphDefinition::new();
        def.add_task(task_on(0));
        def.interpolate(Interpolation::reduce(
            0,
            4,
            InterpolationTarget::TaskArgs,
            0,
            0,
            ReductionOpId(3),
        ));
        assert!(matches!(run(def), Err(SubgraphError::MissingReductionOp(_))));
    }

    #[test]
    fn interpolation_ranges_follow_sorted_rules() {
        let mut def = SubgraphDefinition::new();
        let t0 = def.add_task(task_on(0));
        let t1 = def.add_task(task_on(0));
        def.interpolate(Interpolation::overwrite(0, 1, InterpolationTarget::TaskArgs, 1, 0))
            .interpolate(Interpolation::overwrite(1, 1, InterpolationTarget::TaskArgs, 0, 0))
            .interpolate(Interpolation::overwrite(2, 1, InterpolationTarget::TaskArgs, 1, 1));
        let compiled = run(def).unwrap();

        let r0 = compiled.entry(t0).unwrap().interps.clone();
        let r1 = compiled.entry(t1).unwrap().interps.clone();
        assert_eq!(r0.len(), 1);
        assert_eq!(r1.len(), 2);
        let rules = &compiled.definition.interpolations[r1];
        assert!(rules.iter().all(|r| r.target_key() == t1));
        assert_eq!((rules[0].offset, rules[1].offset), (0, 2));
    }

    #[test]
    fn partition_places_arrivals_round_robin() {
        let mut def = SubgraphDefinition::new();
        let a = def.add_task(task_on(0));
        let b = def.add_task(task_on(1));
        let arrivals: Vec<OpKey> = (0..3)
            .map(|_| {
                def.add_arrival(ArrivalOp {
                    barrier: Barrier::NO_BARRIER,
                    count: 1,
                    reduce_value: vec![],
                })
            })
            .collect();
        def.depend(OpKey::ext_precondition(0), a);
        def.depend(a, b);
        for arr in &arrivals {
            def.depend(b, *arr);
        }

        let compiled = run(def).unwrap();
        let part = compiled.partition.as_ref().unwrap();
        assert_eq!(part.num_procs(), 2);
        assert_eq!(part.ops_of(0).len(), 3); // a, arrival 0, arrival 2
        assert_eq!(part.ops_of(1).len(), 2); // b, arrival 1
        assert_eq!(part.operations[part.ops_of(0).start], a);

        let b_flat = part.flat_index(CompletionTarget { proc: 1, index: 0 });
        assert_eq!(part.successors(b_flat).len(), 3);
        assert_eq!(part.precondition_counts[b_flat], 1);
        assert_eq!(part.external_fanout(0), &[CompletionTarget { proc: 0, index: 0 }]);
        assert!(part.external_fanout(1).is_empty());
    }
}
