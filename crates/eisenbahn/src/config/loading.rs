use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use weave_core::NodeId;

use crate::error::EisenbahnError;
use crate::pipeline::PipelineConfig;
use crate::transport::Transport;

use super::helpers::{generated_endpoint, parse_node_key};
use super::types::{EisenbahnConfig, NodeConfig, PipelineSettings, TransportConfig};

impl EisenbahnConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, EisenbahnError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EisenbahnError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// `count` nodes on this host, talking over IPC sockets.
    pub fn local(count: u32) -> Self {
        Self::generated(TransportConfig::default(), count)
    }

    /// `count` nodes on TCP, node `n` on `host:base_port + n`.
    pub fn distributed(host: &str, base_port: u16, count: u32) -> Self {
        Self::generated(
            TransportConfig {
                kind: "tcp".into(),
                default_host: host.into(),
                base_port,
            },
            count,
        )
    }

    fn generated(transport: TransportConfig, count: u32) -> Self {
        let nodes = (0..count)
            .map(|n| {
                (
                    n.to_string(),
                    NodeConfig {
                        endpoint: generated_endpoint(&transport, n),
                    },
                )
            })
            .collect();
        Self {
            nodes,
            transport,
            pipeline: PipelineSettings::default(),
        }
    }

    /// Configured node ids, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .filter_map(|k| parse_node_key(k))
            .map(NodeId)
            .collect();
        ids.sort();
        ids
    }

    /// Resolve a node's endpoint to a [`Transport`].
    ///
    /// Returns `None` if the node is not configured.
    pub fn transport_for(&self, node: NodeId) -> Option<Transport> {
        self.node_endpoints()
            .remove(&node)
            .and_then(|endpoint| Transport::parse(&endpoint))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            high_water_mark: self.pipeline.high_water_mark,
            connect_timeout: Duration::from_millis(self.pipeline.connect_timeout_ms),
        }
    }

    pub(crate) fn node_endpoints(&self) -> BTreeMap<NodeId, String> {
        self.nodes
            .iter()
            .filter_map(|(k, v)| parse_node_key(k).map(|id| (NodeId(id), v.endpoint.clone())))
            .collect()
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `EISENBAHN_SECTION_KEY` overrides `section.key`:
    /// - `EISENBAHN_TRANSPORT_KIND` -> `transport.kind`
    /// - `EISENBAHN_TRANSPORT_DEFAULT_HOST` -> `transport.default_host`
    /// - `EISENBAHN_TRANSPORT_BASE_PORT` -> `transport.base_port`
    /// - `EISENBAHN_PIPELINE_HIGH_WATER_MARK` -> `pipeline.high_water_mark`
    /// - `EISENBAHN_PIPELINE_CONNECT_TIMEOUT_MS` -> `pipeline.connect_timeout_ms`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("EISENBAHN_TRANSPORT_KIND") {
            self.transport.kind = v;
        }
        if let Ok(v) = std::env::var("EISENBAHN_TRANSPORT_DEFAULT_HOST") {
            self.transport.default_host = v;
        }
        if let Ok(v) = std::env::var("EISENBAHN_TRANSPORT_BASE_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.transport.base_port = port;
            }
        }
        if let Ok(v) = std::env::var("EISENBAHN_PIPELINE_HIGH_WATER_MARK") {
            if let Ok(hwm) = v.parse::<usize>() {
                self.pipeline.high_water_mark = hwm;
            }
        }
        if let Ok(v) = std::env::var("EISENBAHN_PIPELINE_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.pipeline.connect_timeout_ms = ms;
            }
        }
    }
}

impl Default for EisenbahnConfig {
    fn default() -> Self {
        Self::local(1)
    }
}
