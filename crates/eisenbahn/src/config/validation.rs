use std::collections::HashSet;

use super::helpers::parse_node_key;
use super::types::EisenbahnConfig;
use crate::error::EisenbahnError;
use crate::transport::Transport;

impl EisenbahnConfig {
    /// Validate node keys, endpoints and transport settings.
    pub fn validate(&self) -> Result<(), EisenbahnError> {
        self.validate_nodes()?;
        self.validate_transport_kind()?;
        if self.pipeline.high_water_mark == 0 {
            return Err(EisenbahnError::Config(
                "pipeline.high_water_mark must be at least 1".into(),
            ));
        }
        if self.pipeline.connect_timeout_ms == 0 {
            return Err(EisenbahnError::Config(
                "pipeline.connect_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Every key is a node id, every endpoint parses, no endpoint is shared.
    fn validate_nodes(&self) -> Result<(), EisenbahnError> {
        let mut seen = HashSet::new();
        for (key, node) in &self.nodes {
            if parse_node_key(key).is_none() {
                return Err(EisenbahnError::Config(format!(
                    "node key '{key}' is not a node id"
                )));
            }
            if Transport::parse(&node.endpoint).is_none() {
                return Err(EisenbahnError::Config(format!(
                    "node {key} has malformed endpoint '{}'",
                    node.endpoint
                )));
            }
            if !seen.insert(node.endpoint.as_str()) {
                return Err(EisenbahnError::Config(format!(
                    "endpoint '{}' assigned to more than one node",
                    node.endpoint
                )));
            }
        }
        Ok(())
    }

    fn validate_transport_kind(&self) -> Result<(), EisenbahnError> {
        match self.transport.kind.as_str() {
            "ipc" | "tcp" => Ok(()),
            other => Err(EisenbahnError::Config(format!(
                "invalid transport kind '{other}', expected 'ipc' or 'tcp'"
            ))),
        }
    }
}
