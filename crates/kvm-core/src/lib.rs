//! # kvm-core
//!
//! Session protocol engine shared by the KVM server and client: the wire
//! codec, the single-threaded reactor, per-connection sessions, the screen
//! topology and the rule engine.
//!
//! # Architecture overview (for beginners)
//!
//! One machine, the **server**, owns the keyboard and mouse.  Other machines,
//! the **clients**, connect to it over TCP.  When the cursor crosses into a
//! neighbouring screen, the server forwards input to that client until the
//! cursor comes back.
//!
//! This crate is the foundation both programs are built on.  Leaves first:
//!
//! - **`protocol`** – How bytes travel.  Every message is a 4-byte length
//!   prefix, a 4-letter ASCII tag and big-endian fields.  The peers agree on
//!   a protocol *tier* (1.0 .. 1.8) and each tier adds messages.
//!
//! - **`event`** – The event dispatcher: one queue, one thread, timers
//!   included.  Nothing in the engine blocks.
//!
//! - **`net`** – The socket reactor.  It watches non-blocking sockets and turns
//!   readiness into events (`Accepted`, `Frame`, `Closed`, …).
//!
//! - **`session`** – The per-connection state machine: greeting, version
//!   negotiation, keep-alive, clipboard streaming.
//!
//! - **`domain`** – Pure decisions: which screen lies beyond which border,
//!   whether crossing it switches screens, and which hotkeys do what.
//!
//! - **`screen`** / **`status`** – The two seams to the outside world: the
//!   local screen backend the engine drives, and the status events it emits.
//!
//! - **`keymap`** – Key ids, modifier masks and hotkey-string parsing.

pub mod domain;
pub mod event;
pub mod keymap;
pub mod net;
pub mod protocol;
pub mod screen;
pub mod session;
pub mod status;

// Re-export the most-used types at the crate root so callers can write
// `kvm_core::Session` instead of `kvm_core::session::Session`.
pub use domain::{Direction, ScreenName, ScreenShape, TopologyGraph};
pub use event::{Dispatcher, Event, EventLoop, Handler, TimerId};
pub use net::{CloseReason, NetEvent, Token, Transport};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::Message;
pub use protocol::version::{ProtocolVersion, Tier};
pub use screen::ScreenBackend;
pub use session::{Session, SessionConfig, SessionError, SessionEvent};
pub use status::{StatusEvent, StatusSink};
