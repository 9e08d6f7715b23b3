use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Runtime counters, snapshotted through `SubgraphRuntime::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubgraphMetrics {
    pub created: u64,
    pub destroyed: u64,
    pub compile_failures: u64,
    /// Local instantiations that walked the schedule.
    pub classic_instantiations: u64,
    /// Local instantiations run through per-processor replay.
    pub persistent_instantiations: u64,
    /// Requests shipped to the owning node.
    pub remote_sent: u64,
    /// Requests received from other nodes and executed here.
    pub remote_handled: u64,
    /// Event triggers reported to other nodes.
    pub events_forwarded: u64,
    /// Requests the mesh accepted but could not deliver.
    pub undeliverable: u64,
    pub avg_compile_duration: Duration,
    pub last_compile: Option<DateTime<Utc>>,
}

impl SubgraphMetrics {
    /// Record a successful compile.
    pub fn record_compile(&mut self, duration: Duration) {
        self.created += 1;
        self.last_compile = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_compile_duration = if self.created == 1 {
            duration
        } else {
            let prev = self.avg_compile_duration.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            let avg = prev + (cur - prev) / self.created as f64;
            Duration::from_nanos(avg as u64)
        };
    }

    pub fn instantiations(&self) -> u64 {
        self.classic_instantiations + self.persistent_instantiations
    }
}
