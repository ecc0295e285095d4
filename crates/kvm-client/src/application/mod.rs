//! Application layer of the client.
//!
//! # Sub-modules
//!
//! - **`client`** – The orchestrator.  It owns the one session with the server,
//!   applies every forwarded input message to the local [`ScreenBackend`] and
//!   handles clipboard ownership and keep-alive supervision.
//!
//! - **`report_screen`** – Builds the `DINF` screen description from the local
//!   screen backend and detects when it changed.
//!
//! [`ScreenBackend`]: kvm_core::ScreenBackend

pub mod client;
pub mod report_screen;
