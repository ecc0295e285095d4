//! Per-connection protocol state machine.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//!            greeting ok               info acknowledged
//! Handshaking ─────────► Negotiated(tier) ─────────────► Active(tier)
//!      │                      │                              │
//!      └──────────────────────┴──── error / timeout / bye ───┴──► Closing(reason) ──► Closed
//! ```
//!
//! **Server side** (one session per connected screen):
//! 1. On creation the session queues `Hello` with the local version.
//! 2. The client answers `HelloBack` with its version and screen name.  The
//!    session negotiates the tier and reports [`SessionEvent::Negotiated`].
//! 3. The orchestrator checks the name and calls [`Session::accept`] (queues
//!    `QINF`) or [`Session::refuse`] (queues `EUNK`/`EBSY`/`EBAD`).
//! 4. The first `DINF` activates the session (queues `CIAK`).
//!
//! **Client side** mirrors it: wait for `Hello`, reply `HelloBack`, answer
//! `QINF` with `DINF`, become active on `CIAK`.
//!
//! The session never touches a socket.  Outgoing frames collect in an outbox
//! that the orchestrator hands to the [`Transport`] with [`Session::flush`].
//! Any protocol violation moves the session to `Closing`; the orchestrator
//! then drops the connection.  There is no retry.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::net::{Token, Transport};
use crate::protocol::codec::{
    decode_hello, decode_hello_back, decode_message, encode_message, Decoded, ProtocolError,
};
use crate::protocol::messages::{
    ClipboardChunk, ClipboardId, Greeting, Message, MessageKind, MessageTag, ProtocolName,
    ScreenInfo,
};
use crate::protocol::transfer::{
    ClipboardAssembler, ClipboardSender, CompletedClipboard, MAX_CLIPBOARD_SIZE,
};
use crate::protocol::version::{ProtocolVersion, Tier};

// ── Identity and policy ───────────────────────────────────────────────────────

/// Unique id of one session, used in log lines and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is plenty to tell sessions apart in a log.
        let s = self.0.to_string();
        f.write_str(s.split('-').next().unwrap_or(&s))
    }
}

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Keep-alive timing.  A peer silent for `interval * multiple` is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub multiple: u32,
}

impl HeartbeatPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_MULTIPLE: u32 = 3;

    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.multiple.max(1))
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            multiple: Self::DEFAULT_MULTIPLE,
        }
    }
}

/// Settings shared by every session an orchestrator creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub protocol: ProtocolName,
    pub version: ProtocolVersion,
    pub heartbeat: HeartbeatPolicy,
    /// Incoming clipboard transfers declaring more bytes are refused.
    pub max_clipboard_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolName::default(),
            version: ProtocolVersion::local(),
            heartbeat: HeartbeatPolicy::default(),
            max_clipboard_size: MAX_CLIPBOARD_SIZE,
        }
    }
}

// ── States, events, errors ────────────────────────────────────────────────────

/// Why the server turned a client away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The screen name is not part of the topology (`EUNK`).
    UnknownScreen,
    /// A screen with that name is already connected (`EBSY`).
    Busy,
    /// Protocol violation (`EBAD`).
    Bad,
}

impl Refusal {
    fn message(self) -> Message {
        match self {
            Refusal::UnknownScreen => Message::Unknown,
            Refusal::Busy => Message::Busy,
            Refusal::Bad => Message::Bad,
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Refusal::UnknownScreen => "unknown screen name",
            Refusal::Busy => "screen name already in use",
            Refusal::Bad => "protocol error",
        })
    }
}

/// Fatal session endings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("unexpected {kind} while {state}")]
    UnexpectedMessage {
        kind: MessageKind,
        state: &'static str,
    },

    #[error("incompatible protocol version {0}")]
    IncompatibleVersion(ProtocolVersion),

    #[error("peer speaks {found}, expected {expected}")]
    WrongProtocol {
        expected: ProtocolName,
        found: ProtocolName,
    },

    #[error("no keep-alive from peer")]
    HeartbeatTimeout,

    #[error("rejected: {0}")]
    Rejected(Refusal),

    #[error("{operation} is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("session closed")]
    Closed,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Negotiated(Tier),
    Active(Tier),
    Closing(SessionError),
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Handshaking => "handshaking",
            SessionState::Negotiated(_) => "negotiated",
            SessionState::Active(_) => "active",
            SessionState::Closing(_) => "closing",
            SessionState::Closed => "closed",
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            SessionState::Negotiated(tier) | SessionState::Active(tier) => Some(*tier),
            _ => None,
        }
    }
}

/// What one inbound frame meant to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Nothing to do (keep-alive, no-op, partial clipboard transfer).
    None,
    /// Greeting done.  `name` is the client screen's name on both sides.
    Negotiated { name: String, tier: Tier },
    /// The server acknowledged the client's screen info (client side), or the
    /// client sent its first screen info (server side).
    Activated(ScreenInfo),
    /// An active-state message for the orchestrator to apply.
    Message(Message),
    /// A complete clipboard payload arrived.
    Clipboard(CompletedClipboard),
    /// The peer sent a message this tier does not handle.
    Unsupported(MessageTag),
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Protocol state for one connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    token: Token,
    role: Role,
    config: SessionConfig,
    state: SessionState,
    /// Client screen name (peer on the server, self on the client).
    name: Option<String>,
    last_heard: Instant,
    outbox: Vec<u8>,
    assembler: ClipboardAssembler,
    sender: Option<ClipboardSender>,
    /// Last screen info sent (client side).
    info_sent: Option<ScreenInfo>,
}

impl Session {
    /// Creates a server-side session and queues the greeting.
    pub fn server(token: Token, config: SessionConfig, now: Instant) -> Self {
        let mut session = Self::new(token, Role::Server, config, None, now);
        let hello = Message::Hello(session.greeting());
        session.queue(&hello, Tier::V1_0);
        session
    }

    /// Creates a client-side session for screen `name`.  Waits for `Hello`.
    pub fn client(token: Token, config: SessionConfig, name: &str, now: Instant) -> Self {
        Self::new(token, Role::Client, config, Some(name.to_string()), now)
    }

    fn new(
        token: Token,
        role: Role,
        config: SessionConfig,
        name: Option<String>,
        now: Instant,
    ) -> Self {
        let id = SessionId::new();
        debug!(session = %id, %token, ?role, "session created");
        let assembler = ClipboardAssembler::with_limit(config.max_clipboard_size);
        Self {
            id,
            token,
            role,
            config,
            state: SessionState::Handshaking,
            name,
            last_heard: now,
            outbox: Vec::new(),
            assembler,
            sender: None,
            info_sent: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn tier(&self) -> Option<Tier> {
        self.state.tier()
    }

    /// Client screen name, known once the greeting completed (server side).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    /// `true` once the session is closing or closed.
    pub fn is_ending(&self) -> bool {
        matches!(self.state, SessionState::Closing(_) | SessionState::Closed)
    }

    /// The reason the session is closing, if it is.
    pub fn end_reason(&self) -> Option<&SessionError> {
        match &self.state {
            SessionState::Closing(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    pub fn heartbeat(&self) -> HeartbeatPolicy {
        self.config.heartbeat
    }

    /// Changes the keep-alive timing, e.g. when the server sends options.
    pub fn set_heartbeat(&mut self, heartbeat: HeartbeatPolicy) {
        self.config.heartbeat = heartbeat;
    }

    /// Bytes queued in the outbox and not yet flushed.
    pub fn pending_bytes(&self) -> usize {
        self.outbox.len()
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Processes one frame body.
    ///
    /// # Errors
    ///
    /// Any error is fatal: the session is already in `Closing` when this
    /// returns `Err`, and the orchestrator should drop the connection.
    pub fn handle_frame(&mut self, body: &[u8], now: Instant) -> Result<SessionEvent, SessionError> {
        if self.is_ending() {
            return Ok(SessionEvent::None);
        }
        self.last_heard = now;
        let result = match self.state {
            SessionState::Handshaking => match self.role {
                Role::Server => self.on_hello_back(body),
                Role::Client => self.on_hello(body),
            },
            SessionState::Negotiated(tier) | SessionState::Active(tier) => {
                match decode_message(body, tier) {
                    Ok(Decoded::Message(msg)) => {
                        trace!(session = %self.id, kind = %msg.kind(), "received");
                        self.on_message(msg, tier)
                    }
                    Ok(Decoded::Unsupported(tag)) => {
                        debug!(session = %self.id, %tag, %tier, "unsupported message skipped");
                        Ok(SessionEvent::Unsupported(tag))
                    }
                    Err(e) => Err(SessionError::Protocol(e)),
                }
            }
            SessionState::Closing(_) | SessionState::Closed => Ok(SessionEvent::None),
        };
        result.map_err(|e| self.fail(e))
    }

    fn on_hello_back(&mut self, body: &[u8]) -> Result<SessionEvent, SessionError> {
        let (greeting, name) = decode_hello_back(body)?;
        self.check_protocol(greeting)?;
        let Some(tier) = self.config.version.negotiate(greeting.version) else {
            let reply = Message::Incompatible(self.config.version);
            self.queue(&reply, Tier::V1_0);
            return Err(SessionError::IncompatibleVersion(greeting.version));
        };
        info!(session = %self.id, screen = %name, %tier, "client greeted");
        self.name = Some(name.clone());
        self.enter_negotiated(tier);
        Ok(SessionEvent::Negotiated { name, tier })
    }

    fn on_hello(&mut self, body: &[u8]) -> Result<SessionEvent, SessionError> {
        let greeting = decode_hello(body)?;
        self.check_protocol(greeting)?;
        let Some(tier) = self.config.version.negotiate(greeting.version) else {
            return Err(SessionError::IncompatibleVersion(greeting.version));
        };
        let name = self.name.clone().unwrap_or_default();
        let reply = Message::HelloBack {
            greeting: self.greeting(),
            name: name.clone(),
        };
        self.queue(&reply, Tier::V1_0);
        info!(session = %self.id, server_version = %greeting.version, %tier, "server greeted");
        self.enter_negotiated(tier);
        Ok(SessionEvent::Negotiated { name, tier })
    }

    fn check_protocol(&self, greeting: Greeting) -> Result<(), SessionError> {
        if greeting.protocol != self.config.protocol {
            return Err(SessionError::WrongProtocol {
                expected: self.config.protocol,
                found: greeting.protocol,
            });
        }
        Ok(())
    }

    fn enter_negotiated(&mut self, tier: Tier) {
        self.state = SessionState::Negotiated(tier);
        self.sender = Some(ClipboardSender::new(tier));
    }

    fn on_message(&mut self, msg: Message, tier: Tier) -> Result<SessionEvent, SessionError> {
        let active = self.is_active();
        match (self.role, msg) {
            (_, Message::NoOp) => Ok(SessionEvent::None),
            (_, Message::Close) => Err(SessionError::Closed),

            // Server side.
            (Role::Server, Message::KeepAlive) => Ok(SessionEvent::None),
            (Role::Server, Message::Info(info)) => {
                self.queue(&Message::InfoAck, tier);
                if active {
                    Ok(SessionEvent::Message(Message::Info(info)))
                } else {
                    self.state = SessionState::Active(tier);
                    info!(session = %self.id, screen = self.name().unwrap_or(""), "session active");
                    Ok(SessionEvent::Activated(info))
                }
            }
            (Role::Server, msg @ Message::ClipboardGrab { .. }) if active => {
                Ok(SessionEvent::Message(msg))
            }
            (Role::Server, Message::ClipboardData(chunk)) if active => Ok(self.on_clipboard(chunk)),

            // Client side.
            (Role::Client, Message::KeepAlive) => {
                self.queue(&Message::KeepAlive, tier);
                Ok(SessionEvent::None)
            }
            (Role::Client, Message::InfoAck) => match self.info_sent {
                Some(info) if !active => {
                    self.state = SessionState::Active(tier);
                    info!(session = %self.id, "session active");
                    Ok(SessionEvent::Activated(info))
                }
                Some(_) => Ok(SessionEvent::None),
                None => Err(self.unexpected(MessageKind::InfoAck)),
            },
            (Role::Client, Message::Incompatible(version)) => {
                Err(SessionError::IncompatibleVersion(version))
            }
            (Role::Client, Message::Busy) => Err(SessionError::Rejected(Refusal::Busy)),
            (Role::Client, Message::Unknown) => {
                Err(SessionError::Rejected(Refusal::UnknownScreen))
            }
            (Role::Client, Message::Bad) => Err(SessionError::Rejected(Refusal::Bad)),
            (
                Role::Client,
                msg @ (Message::QueryInfo | Message::ResetOptions | Message::SetOptions(_)),
            ) => Ok(SessionEvent::Message(msg)),
            (Role::Client, Message::ClipboardData(chunk)) if active => Ok(self.on_clipboard(chunk)),
            (
                Role::Client,
                msg @ (Message::Enter { .. }
                | Message::Leave
                | Message::ClipboardGrab { .. }
                | Message::ScreenSaver { .. }
                | Message::KeyDown(_)
                | Message::KeyDownLang { .. }
                | Message::KeyRepeat { .. }
                | Message::KeyUp(_)
                | Message::MouseDown(_)
                | Message::MouseUp(_)
                | Message::MouseMove { .. }
                | Message::MouseRelMove { .. }
                | Message::MouseWheel { .. }
                | Message::SecureInput(_)
                | Message::LanguageSync(_)),
            ) if active => Ok(SessionEvent::Message(msg)),

            (_, msg) => Err(self.unexpected(msg.kind())),
        }
    }

    fn on_clipboard(&mut self, chunk: ClipboardChunk) -> SessionEvent {
        if chunk.id.index() >= ClipboardId::ALL.len() {
            debug!(session = %self.id, id = chunk.id.0, "clipboard id out of range ignored");
            return SessionEvent::None;
        }
        match self.assembler.push(chunk) {
            Ok(Some(done)) => {
                debug!(session = %self.id, id = %done.id, len = done.data.len(), "clipboard received");
                SessionEvent::Clipboard(done)
            }
            Ok(None) => SessionEvent::None,
            Err(e) => {
                warn!(session = %self.id, error = %e, "clipboard transfer discarded");
                SessionEvent::None
            }
        }
    }

    fn unexpected(&self, kind: MessageKind) -> SessionError {
        SessionError::UnexpectedMessage {
            kind,
            state: self.state.name(),
        }
    }

    /// Moves to `Closing(error)` and hands the error back.
    fn fail(&mut self, error: SessionError) -> SessionError {
        if !self.is_ending() {
            warn!(session = %self.id, %error, "session failed");
            self.state = SessionState::Closing(error.clone());
        }
        error
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Server: admits the greeted client and asks for its screen info.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless called on a negotiated server session.
    pub fn accept(&mut self) -> Result<(), SessionError> {
        match (self.role, self.state.clone()) {
            (Role::Server, SessionState::Negotiated(tier)) => {
                self.queue(&Message::QueryInfo, tier);
                Ok(())
            }
            _ => Err(self.invalid("accept")),
        }
    }

    /// Server: turns the client away with the matching error message.
    pub fn refuse(&mut self, refusal: Refusal) {
        let tier = self.tier().unwrap_or(Tier::V1_0);
        self.queue(&refusal.message(), tier);
        info!(session = %self.id, %refusal, "client refused");
        self.fail(SessionError::Rejected(refusal));
    }

    /// Encodes `msg` at the negotiated tier and queues it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] before negotiation or after closing,
    /// - [`SessionError::Protocol`] if the tier cannot carry the message.
    ///
    /// Neither changes the session state.
    pub fn send(&mut self, msg: &Message) -> Result<(), SessionError> {
        let tier = match self.state {
            SessionState::Negotiated(tier) | SessionState::Active(tier) => tier,
            _ => return Err(self.invalid("send")),
        };
        let frame = encode_message(msg, tier)?;
        if let Message::Info(info) = msg {
            self.info_sent = Some(*info);
        }
        trace!(session = %self.id, kind = %msg.kind(), "queued");
        self.outbox.extend_from_slice(&frame);
        Ok(())
    }

    /// Queues `CALV` when the tier has keep-alives.  Returns whether it did.
    pub fn send_keep_alive(&mut self) -> bool {
        match self.tier() {
            Some(tier) if tier.capabilities().keep_alive && !self.is_ending() => {
                self.queue(&Message::KeepAlive, tier);
                true
            }
            _ => false,
        }
    }

    /// Checks the peer is still talking.
    ///
    /// # Errors
    ///
    /// [`SessionError::HeartbeatTimeout`] once the peer has been silent for
    /// longer than the heartbeat timeout.  Active sessions below tier 1.3 have
    /// no keep-alive and never time out.
    pub fn check_heartbeat(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closing(_) | SessionState::Closed => return Ok(()),
            SessionState::Active(tier) if !tier.capabilities().keep_alive => return Ok(()),
            _ => {}
        }
        let silent = now.saturating_duration_since(self.last_heard);
        if silent > self.config.heartbeat.timeout() {
            return Err(self.fail(SessionError::HeartbeatTimeout));
        }
        Ok(())
    }

    /// Says goodbye (`CBYE`) if the greeting completed and moves to `Closing`.
    pub fn close(&mut self) {
        if let Some(tier) = self.tier() {
            self.queue(&Message::Close, tier);
        }
        if !self.is_ending() {
            self.state = SessionState::Closing(SessionError::Closed);
        }
    }

    /// Marks the connection as gone.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.outbox.clear();
        if let Some(sender) = self.sender.as_mut() {
            sender.cancel_all();
        }
    }

    /// Hands queued frames to the transport.
    pub fn flush(&mut self, transport: &mut dyn Transport) {
        if !self.outbox.is_empty() {
            transport.send(self.token, &self.outbox);
            self.outbox.clear();
        }
    }

    /// Removes and returns the queued bytes without sending them.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbox)
    }

    // ── Clipboard streaming ───────────────────────────────────────────────────

    /// Starts streaming `data` as clipboard `id`.  Supersedes an unfinished
    /// transfer of the same clipboard.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] before negotiation.
    pub fn begin_clipboard(
        &mut self,
        id: ClipboardId,
        seq: u32,
        data: Vec<u8>,
    ) -> Result<(), SessionError> {
        if self.is_ending() {
            return Err(self.invalid("clipboard transfer"));
        }
        match self.sender.as_mut() {
            Some(sender) => {
                sender.begin(id, seq, data);
                Ok(())
            }
            None => Err(self.invalid("clipboard transfer")),
        }
    }

    /// Stops the outgoing transfer of clipboard `id`.
    pub fn cancel_clipboard(&mut self, id: ClipboardId) -> bool {
        self.sender.as_mut().is_some_and(|s| s.cancel(id))
    }

    /// Queues the next clipboard message.  Returns `false` once nothing is left.
    ///
    /// A chunk that cannot be sent abandons its whole transfer.
    pub fn step_clipboard(&mut self) -> bool {
        let Some(msg) = self.sender.as_mut().and_then(ClipboardSender::next_message) else {
            return false;
        };
        if let Err(e) = self.send(&msg) {
            if let Message::ClipboardData(chunk) = &msg {
                self.cancel_clipboard(chunk.id);
            }
            warn!(session = %self.id, error = %e, "clipboard transfer abandoned");
            return !self.is_clipboard_idle();
        }
        true
    }

    pub fn is_clipboard_idle(&self) -> bool {
        self.sender.as_ref().map_or(true, ClipboardSender::is_idle)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn greeting(&self) -> Greeting {
        Greeting {
            protocol: self.config.protocol,
            version: self.config.version,
        }
    }

    /// Queues a message whose form is known to be valid at `tier`.
    fn queue(&mut self, msg: &Message, tier: Tier) {
        match encode_message(msg, tier) {
            Ok(frame) => self.outbox.extend_from_slice(&frame),
            Err(e) => warn!(session = %self.id, kind = %msg.kind(), error = %e, "could not encode"),
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
