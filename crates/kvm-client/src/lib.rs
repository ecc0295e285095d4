//! kvm-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does kvm-client do? (for beginners)
//!
//! The *client* is a computer whose screen joins the server's layout.  When
//! the user pushes the server's cursor across a border into this screen, the
//! server starts forwarding keyboard and mouse input here until the cursor
//! leaves again.
//!
//! The client application:
//!
//! 1. Connects to the server over TCP and answers its greeting with this
//!    screen's name.
//! 2. Reports its screen shape (`DINF`) so the server can map cursor
//!    positions onto it.
//! 3. Applies forwarded input (`DKDN`, `DMMV`, `DMDN`, …) to the local screen.
//! 4. Exchanges clipboards with the server when the cursor enters or leaves.
//! 5. Echoes keep-alives and gives up on a server that went silent.

/// Application layer: the client orchestrator.
pub mod application;

/// Infrastructure layer: configuration file and the outgoing connection.
pub mod infrastructure;
