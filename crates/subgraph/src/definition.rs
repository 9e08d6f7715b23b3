//! The definition model: operations grouped by kind, dependency edges between
//! them, and interpolation rules that patch operation buffers per
//! instantiation.
//!
//! Operations are addressed by an [`OpKey`] (`kind`, index within that kind's
//! vector). Keys are assigned by the `add_*` builders and never reused.

use std::fmt;

use serde::{Deserialize, Serialize};
use weave_core::{
    Barrier, CopyDesc, ProcessorId, ProfilingRequestSet, ReductionOpId, Reservation, TaskFuncId,
};

use crate::runtime::SubgraphId;

/// Operation kinds. Declaration order is the seeding order of the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Task,
    Copy,
    Arrival,
    Instantiation,
    Acquire,
    Release,
    ExtPrecondition,
    ExtPostcondition,
}

impl OpKind {
    /// Kinds that are issued as real operations, in seeding order.
    pub const SCHEDULED: [OpKind; 6] = [
        OpKind::Task,
        OpKind::Copy,
        OpKind::Arrival,
        OpKind::Instantiation,
        OpKind::Acquire,
        OpKind::Release,
    ];

    pub fn is_external(self) -> bool {
        matches!(self, OpKind::ExtPrecondition | OpKind::ExtPostcondition)
    }

    fn label(self) -> &'static str {
        match self {
            OpKind::Task => "task",
            OpKind::Copy => "copy",
            OpKind::Arrival => "arrival",
            OpKind::Instantiation => "instantiation",
            OpKind::Acquire => "acquire",
            OpKind::Release => "release",
            OpKind::ExtPrecondition => "ext_pre",
            OpKind::ExtPostcondition => "ext_post",
        }
    }
}

/// Stable address of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpKey {
    pub kind: OpKind,
    pub index: u32,
}

impl OpKey {
    pub const fn new(kind: OpKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub const fn task(index: u32) -> Self {
        Self::new(OpKind::Task, index)
    }

    pub const fn copy(index: u32) -> Self {
        Self::new(OpKind::Copy, index)
    }

    pub const fn arrival(index: u32) -> Self {
        Self::new(OpKind::Arrival, index)
    }

    pub const fn instantiation(index: u32) -> Self {
        Self::new(OpKind::Instantiation, index)
    }

    pub const fn acquire(index: u32) -> Self {
        Self::new(OpKind::Acquire, index)
    }

    pub const fn release(index: u32) -> Self {
        Self::new(OpKind::Release, index)
    }

    /// The caller's `index`th precondition event.
    pub const fn ext_precondition(index: u32) -> Self {
        Self::new(OpKind::ExtPrecondition, index)
    }

    /// The caller's `index`th postcondition event.
    pub const fn ext_postcondition(index: u32) -> Self {
        Self::new(OpKind::ExtPostcondition, index)
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind.label(), self.index)
    }
}

#[derive(Debug, Clone)]
pub struct TaskOp {
    pub proc: ProcessorId,
    pub task: TaskFuncId,
    pub args: Vec<u8>,
    pub priority: i32,
    pub profiling: ProfilingRequestSet,
}

impl TaskOp {
    pub fn new(proc: ProcessorId, task: TaskFuncId, args: Vec<u8>) -> Self {
        Self {
            proc,
            task,
            args,
            priority: 0,
            profiling: ProfilingRequestSet::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyOp {
    pub desc: CopyDesc,
    pub priority: i32,
    pub profiling: ProfilingRequestSet,
}

/// Arrive `count` times at `barrier`, contributing `reduce_value` (may be
/// empty).
#[derive(Debug, Clone)]
pub struct ArrivalOp {
    pub barrier: Barrier,
    pub count: u32,
    pub reduce_value: Vec<u8>,
}

/// Nested instantiation of another subgraph.
#[derive(Debug, Clone)]
pub struct InstantiationOp {
    pub subgraph: SubgraphId,
    pub args: Vec<u8>,
    pub priority_adjust: i32,
    pub profiling: ProfilingRequestSet,
}

#[derive(Debug, Clone)]
pub struct AcquireOp {
    pub reservation: Reservation,
    pub mode: u32,
    pub exclusive: bool,
}

#[derive(Debug, Clone)]
pub struct ReleaseOp {
    pub reservation: Reservation,
}

/// Borrowed view of one operation, for exhaustive per-kind handling.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    Task(&'a TaskOp),
    Copy(&'a CopyOp),
    Arrival(&'a ArrivalOp),
    Instantiation(&'a InstantiationOp),
    Acquire(&'a AcquireOp),
    Release(&'a ReleaseOp),
    ExtPrecondition(u32),
    ExtPostcondition(u32),
}

/// `src` (on `src_port`) must complete before `tgt` (on `tgt_port`) starts.
///
/// Ports other than 0 are only meaningful on nested instantiations: output
/// port `k > 0` is the nested subgraph's postcondition `k - 1`, input port
/// `p > 0` feeds its precondition `p - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub src: OpKey,
    pub src_port: u32,
    pub tgt: OpKey,
    pub tgt_port: u32,
}

impl Dependency {
    pub fn new(src: OpKey, tgt: OpKey) -> Self {
        Self {
            src,
            src_port: 0,
            tgt,
            tgt_port: 0,
        }
    }

    pub fn from_port(mut self, port: u32) -> Self {
        self.src_port = port;
        self
    }

    pub fn to_port(mut self, port: u32) -> Self {
        self.tgt_port = port;
        self
    }
}

/// Which buffer of an operation an interpolation patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpolationTarget {
    TaskArgs,
    ArrivalBarrier,
    ArrivalValue,
    InstanceArgs,
}

impl InterpolationTarget {
    /// Kind of operation owning the patched buffer.
    pub fn op_kind(self) -> OpKind {
        match self {
            InterpolationTarget::TaskArgs => OpKind::Task,
            InterpolationTarget::ArrivalBarrier | InterpolationTarget::ArrivalValue => {
                OpKind::Arrival
            }
            InterpolationTarget::InstanceArgs => OpKind::Instantiation,
        }
    }
}

/// Patch `bytes` bytes from `offset` of the instantiation arguments into the
/// target buffer at `target_offset`, overwriting, or reducing with `redop`
/// when it is not [`ReductionOpId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpolation {
    pub offset: usize,
    pub bytes: usize,
    pub target: InterpolationTarget,
    pub target_index: u32,
    pub target_offset: usize,
    pub redop: ReductionOpId,
}

impl Interpolation {
    pub fn overwrite(
        offset: usize,
        bytes: usize,
        target: InterpolationTarget,
        target_index: u32,
        target_offset: usize,
    ) -> Self {
        Self {
            offset,
            bytes,
            target,
            target_index,
            target_offset,
            redop: ReductionOpId::NONE,
        }
    }

    pub fn reduce(
        offset: usize,
        bytes: usize,
        target: InterpolationTarget,
        target_index: u32,
        target_offset: usize,
        redop: ReductionOpId,
    ) -> Self {
        Self {
            redop,
            ..Self::overwrite(offset, bytes, target, target_index, target_offset)
        }
    }

    /// Key of the operation this rule patches.
    pub fn target_key(&self) -> OpKey {
        OpKey::new(self.target.op_kind(), self.target_index)
    }
}

/// A complete subgraph description, handed once to `create`.
#[derive(Debug, Clone, Default)]
pub struct SubgraphDefinition {
    pub tasks: Vec<TaskOp>,
    pub copies: Vec<CopyOp>,
    pub arrivals: Vec<ArrivalOp>,
    pub instantiations: Vec<InstantiationOp>,
    pub acquires: Vec<AcquireOp>,
    pub releases: Vec<ReleaseOp>,
    pub dependencies: Vec<Dependency>,
    pub interpolations: Vec<Interpolation>,
}

fn next_index<T>(ops: &[T]) -> u32 {
    ops.len() as u32
}

impl SubgraphDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, op: TaskOp) -> OpKey {
        let key = OpKey::task(next_index(&self.tasks));
        self.tasks.push(op);
        key
    }

    pub fn add_copy(&mut self, op: CopyOp) -> OpKey {
        let key = OpKey::copy(next_index(&self.copies));
        self.copies.push(op);
        key
    }

    pub fn add_arrival(&mut self, op: ArrivalOp) -> OpKey {
        let key = OpKey::arrival(next_index(&self.arrivals));
        self.arrivals.push(op);
        key
    }

    pub fn add_instantiation(&mut self, op: InstantiationOp) -> OpKey {
        let key = OpKey::instantiation(next_index(&self.instantiations));
        self.instantiations.push(op);
        key
    }

    pub fn add_acquire(&mut self, op: AcquireOp) -> OpKey {
        let key = OpKey::acquire(next_index(&self.acquires));
        self.acquires.push(op);
        key
    }

    pub fn add_release(&mut self, op: ReleaseOp) -> OpKey {
        let key = OpKey::release(next_index(&self.releases));
        self.releases.push(op);
        key
    }

    /// Port-0 dependency `src -> tgt`.
    pub fn depend(&mut self, src: OpKey, tgt: OpKey) -> &mut Self {
        self.dependencies.push(Dependency::new(src, tgt));
        self
    }

    pub fn add_dependency(&mut self, dep: Dependency) -> &mut Self {
        self.dependencies.push(dep);
        self
    }

    pub fn interpolate(&mut self, rule: Interpolation) -> &mut Self {
        self.interpolations.push(rule);
        self
    }

    /// Number of declared operations of `kind`. External kinds have no
    /// declared count and report 0.
    pub fn count(&self, kind: OpKind) -> usize {
        match kind {
            OpKind::Task => self.tasks.len(),
            OpKind::Copy => self.copies.len(),
            OpKind::Arrival => self.arrivals.len(),
            OpKind::Instantiation => self.instantiations.len(),
            OpKind::Acquire => self.acquires.len(),
            OpKind::Release => self.releases.len(),
            OpKind::ExtPrecondition | OpKind::ExtPostcondition => 0,
        }
    }

    /// Total number of scheduled (non-external) operations.
    pub fn total_ops(&self) -> usize {
        OpKind::SCHEDULED.iter().map(|&k| self.count(k)).sum()
    }

    pub fn operation(&self, key: OpKey) -> Option<Operation<'_>> {
        let i = key.index as usize;
        Some(match key.kind {
            OpKind::Task => Operation::Task(self.tasks.get(i)?),
            OpKind::Copy => Operation::Copy(self.copies.get(i)?),
            OpKind::Arrival => Operation::Arrival(self.arrivals.get(i)?),
            OpKind::Instantiation => Operation::Instantiation(self.instantiations.get(i)?),
            OpKind::Acquire => Operation::Acquire(self.acquires.get(i)?),
            OpKind::Release => Operation::Release(self.releases.get(i)?),
            OpKind::ExtPrecondition => Operation::ExtPrecondition(key.index),
            OpKind::ExtPostcondition => Operation::ExtPostcondition(key.index),
        })
    }
}
