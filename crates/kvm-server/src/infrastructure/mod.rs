//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: the configuration file on disk and the
//! listening socket.
//!
//! **Dependency rule**: this layer may depend on `application` and `kvm_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod network;
pub mod storage;
