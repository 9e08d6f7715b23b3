use serde::{Deserialize, Serialize};

use crate::ids::{ProcessorId, TaskFuncId};

/// A single profiling request: which measurements to take and where to send
/// the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingRequest {
    pub response_proc: ProcessorId,
    pub response_task: TaskFuncId,
    pub measurements: Vec<u32>,
    #[serde(default)]
    pub user_data: Vec<u8>,
}

/// Opaque set of profiling requests attached to an operation.
///
/// The subgraph engine only stores and forwards these; interpreting them is
/// up to the processor and copy services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingRequestSet {
    pub requests: Vec<ProfilingRequest>,
}

impl ProfilingRequestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: ProfilingRequest) -> &mut Self {
        self.requests.push(request);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
