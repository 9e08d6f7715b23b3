//! Topic constants for node-to-node requests.
//!
//! Topics follow `weave.<component>.<request>`.

/// Run an instantiation of a subgraph owned by the receiving node.
pub const SUBGRAPH_INSTANTIATE: &str = "weave.subgraph.instantiate";

/// Destroy a subgraph owned by the receiving node.
pub const SUBGRAPH_DESTROY: &str = "weave.subgraph.destroy";

/// An event minted on one node was triggered on another.
pub const EVENT_TRIGGERED: &str = "weave.event.triggered";
