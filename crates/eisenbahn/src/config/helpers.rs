use crate::transport::Transport;

use super::types::TransportConfig;

/// Endpoint generated for `node` when the config does not list one.
pub(crate) fn generated_endpoint(transport: &TransportConfig, node: u32) -> String {
    match transport.kind.as_str() {
        "tcp" => Transport::tcp(
            transport.default_host.clone(),
            transport.base_port.saturating_add(node as u16),
        )
        .endpoint(),
        _ => Transport::ipc(&format!("node-{node}")).endpoint(),
    }
}

/// Parse a `[nodes.<id>]` key.
pub(crate) fn parse_node_key(key: &str) -> Option<u32> {
    key.trim().parse().ok()
}
