//! Pluggable scheduling policies: where arrivals run under persistent
//! replay, and which instantiation path a runtime uses.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weave_core::ProcessorId;

/// Chooses the processor that hosts an arrival in the replay partition.
pub trait ArrivalPlacement: Send + Sync {
    /// Index into `procs` (the distinct task processors, in first-seen
    /// schedule order) for the `nth` arrival. `procs` is never empty.
    fn place(&self, nth: usize, procs: &[ProcessorId]) -> usize;
}

/// Deals arrivals out across the task processors in turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinPlacement;

impl ArrivalPlacement for RoundRobinPlacement {
    fn place(&self, nth: usize, procs: &[ProcessorId]) -> usize {
        nth % procs.len()
    }
}

/// Puts every arrival on the first task processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstProcessorPlacement;

impl ArrivalPlacement for FirstProcessorPlacement {
    fn place(&self, _nth: usize, _procs: &[ProcessorId]) -> usize {
        0
    }
}

/// Config-level name of a built-in [`ArrivalPlacement`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPlacementKind {
    #[default]
    RoundRobin,
    FirstProcessor,
}

impl ArrivalPlacementKind {
    pub fn build(self) -> Arc<dyn ArrivalPlacement> {
        match self {
            ArrivalPlacementKind::RoundRobin => Arc::new(RoundRobinPlacement),
            ArrivalPlacementKind::FirstProcessor => Arc::new(FirstProcessorPlacement),
        }
    }
}

impl FromStr for ArrivalPlacementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "first_processor" | "first-processor" => Ok(Self::FirstProcessor),
            other => Err(format!("unknown arrival placement '{other}'")),
        }
    }
}

/// Which instantiation path to take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Walk the schedule and merge events on every call.
    #[default]
    Classic,
    /// Use per-processor replay when the schedule supports it; otherwise warn
    /// and fall back to classic.
    Persistent,
    /// Use per-processor replay when the schedule supports it, quietly.
    Auto,
}

impl ReplayMode {
    /// Whether a schedule that `replayable` (or not) should take the
    /// persistent path.
    pub fn wants_persistent(self, replayable: bool) -> bool {
        match self {
            ReplayMode::Classic => false,
            ReplayMode::Persistent | ReplayMode::Auto => replayable,
        }
    }
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplayMode::Classic => "classic",
            ReplayMode::Persistent => "persistent",
            ReplayMode::Auto => "auto",
        })
    }
}

impl FromStr for ReplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" => Ok(Self::Classic),
            "persistent" => Ok(Self::Persistent),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown replay mode '{other}'")),
        }
    }
}
