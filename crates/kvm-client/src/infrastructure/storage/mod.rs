//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the client's TOML file, falls back to
//! defaults on first run, and resolves the server address.

pub mod config;
