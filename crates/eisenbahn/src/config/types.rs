use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HIGH_WATER_MARK};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the messaging layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EisenbahnConfig {
    /// Node endpoints keyed by node id (`[nodes.0]`, `[nodes.1]`, ...).
    ///
    /// TOML table keys are strings; they are checked to be node ids by
    /// `validate`.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,

    /// Default transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

// ── Section configs ─────────────────────────────────────────────────

/// One node of the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Where the node binds its PULL socket, e.g. `tcp://10.0.0.2:5570`.
    pub endpoint: String,
}

/// Transport defaults section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Default transport type: "ipc" or "tcp".
    #[serde(default = "default_transport_kind")]
    pub kind: String,

    /// Default TCP host (used when kind = "tcp").
    #[serde(default = "default_tcp_host")]
    pub default_host: String,

    /// Node `n` listens on `base_port + n` when endpoints are generated.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_transport_kind() -> String {
    "ipc".into()
}

fn default_tcp_host() -> String {
    "127.0.0.1".into()
}

fn default_base_port() -> u16 {
    5570
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            default_host: default_tcp_host(),
            base_port: default_base_port(),
        }
    }
}

/// Pipeline socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// How long to keep retrying a refused peer before its messages are
    /// reported undeliverable.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}
