//! Environment overrides for `SubgraphConfig`. Kept in its own test binary
//! so the variables it sets cannot leak into other tests.

use weave_subgraph::{ArrivalPlacementKind, ReplayMode, SubgraphConfig};

#[test]
fn profiled_env_overrides_file_values() {
    std::env::set_var("WEAVE_PROFILE", "bench");
    std::env::set_var("WEAVE_REPLAY_MODE", "classic");
    std::env::set_var("BENCH_WEAVE_REPLAY_MODE", "persistent");
    std::env::set_var("WEAVE_NODE_ID", "3");
    std::env::set_var("WEAVE_ARRIVAL_PLACEMENT", "first-processor");
    std::env::set_var("WEAVE_SCRATCH_BYTES", "not-a-number");

    let config = SubgraphConfig::from_toml(
        r#"
[subgraph]
node_id = 1
replay_mode = "auto"
scratch_bytes = 256
"#,
    )
    .unwrap();
    assert_eq!(config.node_id, 3);
    assert_eq!(config.replay_mode, ReplayMode::Persistent);
    assert_eq!(config.arrival_placement, ArrivalPlacementKind::FirstProcessor);
    // unparsable overrides are ignored
    assert_eq!(config.scratch_bytes, 256);

    std::env::set_var("WEAVE_SCRATCH_BYTES", "4096");
    let err = SubgraphConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("scratch_bytes"));
}
