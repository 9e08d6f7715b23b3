//! Mesh configuration: which node listens where.
//!
//! Parsed from `weave.toml` (or built with [`EisenbahnConfig::local`]) with
//! `EISENBAHN_*` environment overrides applied on top.

mod helpers;
mod loading;
mod types;
mod validation;


pub use types::{EisenbahnConfig, NodeConfig, PipelineSettings, TransportConfig};
