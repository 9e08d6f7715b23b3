//! Environment helpers shared by the config layers of every crate.
//!
//! Config structs are parsed from TOML by their owning crate; these helpers
//! apply `WEAVE_*` style overrides on top. A profile (from `WEAVE_PROFILE`)
//! prefixes every key: with `WEAVE_PROFILE=bench`, `BENCH_WEAVE_NODE_ID` wins
//! over `WEAVE_NODE_ID`.

use std::env;
use std::str::FromStr;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Active profile name, upper-cased. Empty when unset.
pub fn active_profile() -> String {
    env_or("WEAVE_PROFILE", "").to_uppercase()
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a profiled env var, ignoring values that fail to parse.
pub fn profiled_env_parse<T: FromStr>(profile: &str, key: &str) -> Option<T> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}
