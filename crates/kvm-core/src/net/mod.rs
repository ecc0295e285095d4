//! Non-blocking TCP plumbing: socket tokens, network events and the transport seam.
//!
//! The [`reactor::Reactor`] owns every socket.  Orchestrators never touch a
//! socket directly: they receive [`NetEvent`]s through the dispatcher and send
//! bytes through the [`Transport`] trait, which tests replace with
//! [`mock::RecordingTransport`].

pub mod mock;
pub mod reactor;

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::protocol::ProtocolError;

/// Handle for one registered socket.  Tokens are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a socket stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the stream.
    EndOfStream,
    /// The connection was reset or aborted.
    Reset,
    /// Any other transport failure.
    Io(io::ErrorKind),
}

impl CloseReason {
    /// Classifies a transport error.  Callers filter out `WouldBlock` first.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => CloseReason::Reset,
            io::ErrorKind::UnexpectedEof => CloseReason::EndOfStream,
            kind => CloseReason::Io(kind),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => f.write_str("connection closed by peer"),
            CloseReason::Reset => f.write_str("connection reset"),
            CloseReason::Io(kind) => write!(f, "I/O error: {kind}"),
        }
    }
}

/// Something that happened on a socket.
#[derive(Debug, PartialEq)]
pub enum NetEvent {
    /// A listening socket accepted a connection, registered as `token`.
    Accepted {
        listener: Token,
        token: Token,
        peer: SocketAddr,
    },
    /// An outbound connect completed.
    Connected(Token),
    /// One complete frame body arrived.
    Frame { token: Token, body: Vec<u8> },
    /// The outbox emptied after the socket had pushed back.
    Drained(Token),
    /// The socket is gone; the token is no longer valid.
    Closed { token: Token, reason: CloseReason },
    /// The byte stream violated the framing rules.  No further frames
    /// are delivered for this token; the owner should close it.
    Malformed { token: Token, error: ProtocolError },
}

impl NetEvent {
    pub fn token(&self) -> Token {
        match self {
            NetEvent::Accepted { token, .. }
            | NetEvent::Frame { token, .. }
            | NetEvent::Closed { token, .. }
            | NetEvent::Malformed { token, .. } => *token,
            NetEvent::Connected(token) | NetEvent::Drained(token) => *token,
        }
    }
}

/// Receives network events as the reactor produces them.
pub trait NetSink {
    fn post_net(&mut self, event: NetEvent);
}

impl<U> NetSink for crate::event::Dispatcher<U> {
    fn post_net(&mut self, event: NetEvent) {
        self.post(crate::event::Event::Net(event));
    }
}

impl NetSink for Vec<NetEvent> {
    fn post_net(&mut self, event: NetEvent) {
        self.push(event);
    }
}

/// Outbound side of the socket layer.
///
/// Sends never block and never fail synchronously: bytes the socket cannot
/// take yet stay queued, and transport failures arrive later as
/// [`NetEvent::Closed`].
pub trait Transport {
    /// Queues `bytes` (one or more complete frames) for `token`.
    fn send(&mut self, token: Token, bytes: &[u8]);

    /// Closes `token` after flushing what is already queued.  No further
    /// events are delivered for it.
    fn close(&mut self, token: Token);

    /// Bytes queued for `token` that the socket has not accepted yet.
    fn backlog(&self, token: Token) -> usize;
}
