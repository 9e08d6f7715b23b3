use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::CoreError;
use crate::event::{Event, EventService, OnTrigger};
use crate::ids::RegionId;
use crate::profiling::ProfilingRequestSet;

/// A byte-range copy between two regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyDesc {
    pub src: RegionId,
    pub src_offset: usize,
    pub dst: RegionId,
    pub dst_offset: usize,
    pub bytes: usize,
}

/// Region-copy service.
pub trait CopyService: Send + Sync {
    /// Issue `desc` once `precondition` triggers. The returned event triggers
    /// when the copy is done, poisoned if it failed.
    fn issue_copy(
        &self,
        desc: &CopyDesc,
        profiling: &ProfilingRequestSet,
        precondition: Event,
        priority: i32,
    ) -> Event;
}

struct RegionTable {
    events: Arc<dyn EventService>,
    next_id: AtomicU64,
    regions: Mutex<HashMap<RegionId, Vec<u8>>>,
}

/// Copy engine over in-memory byte regions.
#[derive(Clone)]
pub struct LocalCopyEngine {
    table: Arc<RegionTable>,
}

impl LocalCopyEngine {
    pub fn new(events: Arc<dyn EventService>) -> Self {
        Self {
            table: Arc::new(RegionTable {
                events,
                next_id: AtomicU64::new(1),
                regions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn create_region(&self, size: usize) -> RegionId {
        let id = RegionId(self.table.next_id.fetch_add(1, Ordering::Relaxed));
        self.table.regions.lock().insert(id, vec![0u8; size]);
        id
    }

    pub fn write(&self, region: RegionId, offset: usize, data: &[u8]) -> Result<(), CoreError> {
        let mut regions = self.table.regions.lock();
        let buf = regions.get_mut(&region).ok_or(CoreError::UnknownRegion(region))?;
        let end = offset + data.len();
        if end > buf.len() {
            return Err(CoreError::CopyOutOfBounds(format!(
                "write {}..{} into {:?} of {} bytes",
                offset,
                end,
                region,
                buf.len()
            )));
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, region: RegionId) -> Result<Vec<u8>, CoreError> {
        self.table
            .regions
            .lock()
            .get(&region)
            .cloned()
            .ok_or(CoreError::UnknownRegion(region))
    }
}

impl RegionTable {
    fn perform(&self, desc: &CopyDesc) -> Result<(), CoreError> {
        let mut regions = self.regions.lock();
        let src = regions.get(&desc.src).ok_or(CoreError::UnknownRegion(desc.src))?;
        let src_end = desc.src_offset + desc.bytes;
        if src_end > src.len() {
            return Err(CoreError::CopyOutOfBounds(format!(
                "source {:?} has {} bytes, copy reads up to {}",
                desc.src,
                src.len(),
                src_end
            )));
        }
        let data = src[desc.src_offset..src_end].to_vec();
        let dst = regions
            .get_mut(&desc.dst)
            .ok_or(CoreError::UnknownRegion(desc.dst))?;
        let dst_end = desc.dst_offset + desc.bytes;
        if dst_end > dst.len() {
            return Err(CoreError::CopyOutOfBounds(format!(
                "destination {:?} has {} bytes, copy writes up to {}",
                desc.dst,
                dst.len(),
                dst_end
            )));
        }
        dst[desc.dst_offset..dst_end].copy_from_slice(&data);
        Ok(())
    }
}

impl CopyService for LocalCopyEngine {
    fn issue_copy(
        &self,
        desc: &CopyDesc,
        _profiling: &ProfilingRequestSet,
        precondition: Event,
        _priority: i32,
    ) -> Event {
        let done = self.table.events.create();
        let table = Arc::clone(&self.table);
        let desc = desc.clone();
        self.table.events.add_waiter(
            precondition,
            OnTrigger::new(move |poisoned| {
                if poisoned {
                    table.events.trigger(done, true);
                    return;
                }
                match table.perform(&desc) {
                    Ok(()) => {
                        debug!(bytes = desc.bytes, "copy complete");
                        table.events.trigger(done, false);
                    }
                    Err(e) => {
                        error!(error = %e, "copy failed");
                        table.events.trigger(done, true);
                    }
                }
            }),
        );
        done
    }
}
