use thiserror::Error;

use crate::ids::{ProcessorId, RegionId, ReductionOpId, TaskFuncId};

/// Errors raised by the collaborator services.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown processor: {0}")]
    UnknownProcessor(ProcessorId),

    #[error("no task function registered for {0}")]
    UnknownTask(TaskFuncId),

    #[error("unknown region: {0:?}")]
    UnknownRegion(RegionId),

    #[error("reduction op {0:?} already registered")]
    DuplicateReductionOp(ReductionOpId),

    #[error("reduction op id 0 is reserved for overwrite")]
    ReservedReductionOp,

    #[error("copy out of bounds: {0}")]
    CopyOutOfBounds(String),

    #[error("{0}")]
    Other(String),
}
