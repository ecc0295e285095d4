//! Infrastructure layer for the client.
//!
//! Contains the OS-facing adapters: the configuration file on disk and the
//! outgoing connection to the server.
//!
//! **Dependency rule**: this layer may depend on `application` and `kvm_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod network;
pub mod storage;
