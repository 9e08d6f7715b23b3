//! Runtime settings, read from the `[subgraph]` table of `weave.toml`.
//!
//! ```toml
//! [subgraph]
//! node_id = 0
//! replay_mode = "auto"               # classic | persistent | auto
//! arrival_placement = "round_robin"  # round_robin | first_processor
//! scratch_bytes = 1024
//! ```
//!
//! Environment overrides (profiled through `WEAVE_PROFILE`):
//! `WEAVE_NODE_ID`, `WEAVE_REPLAY_MODE`, `WEAVE_ARRIVAL_PLACEMENT`,
//! `WEAVE_SCRATCH_BYTES`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use weave_core::config::{active_profile, profiled_env_parse};
use weave_core::NodeId;

use crate::error::{Result, SubgraphError};
use crate::interpolation::INLINE_SCRATCH_BYTES;
use crate::policy::{ArrivalPlacementKind, ReplayMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphConfig {
    #[serde(default)]
    pub node_id: u32,

    #[serde(default)]
    pub replay_mode: ReplayMode,

    #[serde(default)]
    pub arrival_placement: ArrivalPlacementKind,

    /// Largest patched buffer kept in the inline interpolation scratch.
    #[serde(default = "default_scratch_bytes")]
    pub scratch_bytes: usize,
}

fn default_scratch_bytes() -> usize {
    INLINE_SCRATCH_BYTES
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    subgraph: SubgraphConfig,
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            replay_mode: ReplayMode::default(),
            arrival_placement: ArrivalPlacementKind::default(),
            scratch_bytes: default_scratch_bytes(),
        }
    }
}

impl SubgraphConfig {
    /// Parse the `[subgraph]` table from a full config file. Other tables are
    /// ignored; a missing table yields defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = file.subgraph;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn node(&self) -> NodeId {
        NodeId(self.node_id)
    }

    pub fn with_replay_mode(mut self, mode: ReplayMode) -> Self {
        self.replay_mode = mode;
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node_id = node.0;
        self
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        let profile = active_profile();
        if let Some(v) = profiled_env_parse(&profile, "WEAVE_NODE_ID") {
            self.node_id = v;
        }
        if let Some(v) = profiled_env_parse(&profile, "WEAVE_REPLAY_MODE") {
            self.replay_mode = v;
        }
        if let Some(v) = profiled_env_parse(&profile, "WEAVE_ARRIVAL_PLACEMENT") {
            self.arrival_placement = v;
        }
        if let Some(v) = profiled_env_parse(&profile, "WEAVE_SCRATCH_BYTES") {
            self.scratch_bytes = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scratch_bytes > INLINE_SCRATCH_BYTES {
            return Err(SubgraphError::Config(format!(
                "subgraph.scratch_bytes must be at most {INLINE_SCRATCH_BYTES}, got {}",
                self.scratch_bytes
            )));
        }
        Ok(())
    }
}
