//! Application layer of the server.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules, here in `kvm_core::domain`) and the infrastructure
//! (sockets, files, the real screen).
//!
//! Code in this layer:
//!
//! - **Orchestrates** core objects to fulfil a user goal (e.g., "move the
//!   keyboard and mouse to the screen on the right").
//! - **Depends on abstractions** (`ScreenBackend`, `StatusSink`, `Transport`)
//!   rather than concrete implementations, so tests can drive it with
//!   recording mocks.
//! - **Contains no OS calls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`server`** – The orchestrator.  It reacts to every event of the run
//!   loop: new connections, frames, timers and local input.  It decides which
//!   screen owns the keyboard and mouse and forwards input there.
//!
//! - **`client_registry`** – The table of connected client screens, keyed by
//!   connection token.

pub mod client_registry;
pub mod server;
