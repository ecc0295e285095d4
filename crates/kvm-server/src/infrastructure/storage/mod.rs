//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the server's TOML file, falls back to
//! defaults on first run, and turns the file's plain strings and numbers into
//! the validated core types the orchestrator works with (`TopologyGraph`,
//! `RuleEngine`, `SwitchOptions`, `HeartbeatPolicy`).

pub mod config;
