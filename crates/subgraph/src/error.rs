use thiserror::Error;
use weave_core::{CoreError, ReductionOpId};
use weave_eisenbahn::EisenbahnError;

use crate::definition::{InterpolationTarget, OpKey};
use crate::runtime::SubgraphId;

/// Errors raised while compiling, instantiating or dispatching subgraphs.
#[derive(Error, Debug)]
pub enum SubgraphError {
    #[error("dependency cycle: ranks did not converge after {passes} passes")]
    Cycle { passes: usize },

    #[error("{key} is out of range ({len} declared)")]
    OpIndexOutOfRange { key: OpKey, len: usize },

    #[error("{key} has no port {port}; only instantiations use non-zero ports")]
    InvalidPort { key: OpKey, port: u32 },

    #[error("invalid dependency {src} -> {tgt}: {reason}")]
    InvalidDependency {
        src: OpKey,
        tgt: OpKey,
        reason: &'static str,
    },

    #[error("reduction op {0:?} is not registered")]
    MissingReductionOp(ReductionOpId),

    #[error("reduction op {redop:?} expects {expected}-byte operands, rule moves {bytes}")]
    ReductionSizeMismatch {
        redop: ReductionOpId,
        expected: usize,
        bytes: usize,
    },

    #[error("interpolation targets {target:?}[{index}] but only {len} exist")]
    InterpolationTargetOutOfRange {
        target: InterpolationTarget,
        index: u32,
        len: usize,
    },

    #[error("unknown or destroyed subgraph {0}")]
    UnknownSubgraph(SubgraphId),

    #[error("subgraph {0} is owned by another node and no mesh is configured")]
    NoNetwork(SubgraphId),

    #[error("collaborator error: {0}")]
    Core(#[from] CoreError),

    #[error("messaging error: {0}")]
    Message(#[from] EisenbahnError),

    #[error("request encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("request decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SubgraphError>;
