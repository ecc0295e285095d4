//! Client orchestrator: applies the server's input to the local screen.
//!
//! [`Client`] is the [`Handler`] the client's event loop drives.  It owns the
//! single session with the server.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! connect ──► Connected ──► HELO/HELO-back ──► QINF/DINF ──► CIAK: active
//!                                                              │
//!            CINN (entered) ◄──► COUT (left) ◄─────────────────┘
//! ```
//!
//! While the cursor is on this screen (between `CINN` and `COUT`) the user
//! may copy something.  The client then announces the grab (`CCLP`) right
//! away and streams the data (`DCLP`) when the cursor leaves, unless the
//! data is unchanged since the last time it was sent.
//!
//! The client does not reconnect: when the session ends the loop stops and
//! the caller decides what to do next.

use std::fmt;

use kvm_core::protocol::messages::{ClipboardId, ScreenInfo, OPTION_HEARTBEAT};
use kvm_core::protocol::transfer::CompletedClipboard;
use kvm_core::protocol::EnterSequence;
use kvm_core::screen::{KeyPhase, ScreenError};
use kvm_core::session::HeartbeatPolicy;
use kvm_core::{
    CloseReason, Dispatcher, Event, Handler, Message, NetEvent, ScreenBackend, Session,
    SessionConfig, SessionError, SessionEvent, StatusEvent, StatusSink, TimerId, Token, Transport,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::application::report_screen::{screen_info, screen_info_changed};

/// Events of the client's event loop besides network events and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The user copied something on this screen.
    ClipboardGrabbed(ClipboardId),
    /// The local screen's resolution or layout changed.
    ScreenChanged,
    /// Continue streaming clipboard chunks.
    Pump,
    /// Say goodbye to the server and stop the loop.
    Shutdown,
}

/// Why the session with the server ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Session(SessionError),
    Transport(CloseReason),
    /// The client was asked to stop.
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Session(error) => error.fmt(f),
            EndReason::Transport(reason) => reason.fmt(f),
            EndReason::Shutdown => f.write_str("shut down"),
        }
    }
}

/// Client settings, built from the configuration file.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Name this screen greets the server with.
    pub screen_name: String,
    pub session: SessionConfig,
    pub clipboard_sharing: bool,
}

impl ClientSettings {
    pub fn new(screen_name: impl Into<String>) -> Self {
        Self {
            screen_name: screen_name.into(),
            session: SessionConfig::default(),
            clipboard_sharing: true,
        }
    }
}

/// Local ownership of one clipboard.
#[derive(Debug, Default)]
struct OwnedClipboard {
    /// This screen holds the latest copy.
    owned: bool,
    /// Data last streamed to the server, to skip resending unchanged data.
    sent: Option<Vec<u8>>,
}

/// The client orchestrator.
pub struct Client<S, St> {
    settings: ClientSettings,
    screen: S,
    status: St,
    /// Connection token, set once the connect was started.
    server: Option<Token>,
    session: Option<Session>,
    seq: EnterSequence,
    entered: bool,
    clipboards: [OwnedClipboard; ClipboardId::ALL.len()],
    /// Screen description last sent in `DINF`.
    last_info: Option<ScreenInfo>,
    heartbeat_timer: Option<TimerId>,
    pump_posted: bool,
    end_reason: Option<EndReason>,
}

impl<S: ScreenBackend, St: StatusSink> Client<S, St> {
    pub fn new(settings: ClientSettings, screen: S, status: St) -> Self {
        Self {
            settings,
            screen,
            status,
            server: None,
            session: None,
            seq: EnterSequence::new(),
            entered: false,
            clipboards: Default::default(),
            last_info: None,
            heartbeat_timer: None,
            pump_posted: false,
            end_reason: None,
        }
    }

    /// Records the connection started on `token` towards `addr`.
    pub fn begin(&mut self, token: Token, addr: SocketAddr) {
        info!(%addr, screen = %self.settings.screen_name, "connecting to server");
        self.server = Some(token);
        self.status.publish(StatusEvent::Connecting { addr });
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// `true` once the server acknowledged this screen's info.
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_active)
    }

    /// `true` while the cursor is on this screen.
    pub fn is_entered(&self) -> bool {
        self.entered
    }

    pub fn owns_clipboard(&self, id: ClipboardId) -> bool {
        self.clipboards
            .get(id.index())
            .is_some_and(|clipboard| clipboard.owned)
    }

    pub fn enter_sequence(&self) -> u32 {
        self.seq.current()
    }

    /// Keep-alive settings currently in force.
    pub fn heartbeat(&self) -> HeartbeatPolicy {
        self.session
            .as_ref()
            .map_or(self.settings.session.heartbeat, Session::heartbeat)
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut S {
        &mut self.screen
    }

    pub fn status(&self) -> &St {
        &self.status
    }

    // ── Network ───────────────────────────────────────────────────────────────

    fn on_net(
        &mut self,
        event: NetEvent,
        dispatcher: &mut Dispatcher<ClientEvent>,
        transport: &mut dyn Transport,
    ) {
        if self.server != Some(event.token()) {
            debug!(token = %event.token(), "event for unknown connection");
            return;
        }
        match event {
            NetEvent::Connected(token) => {
                info!(%token, "connected, waiting for greeting");
                let session = Session::client(
                    token,
                    self.settings.session.clone(),
                    &self.settings.screen_name,
                    dispatcher.now(),
                );
                self.session = Some(session);
                self.restart_heartbeat_timer(dispatcher);
            }
            NetEvent::Frame { body, .. } => self.on_frame(&body, dispatcher, transport),
            NetEvent::Drained(_) => {}
            NetEvent::Closed { reason, .. } => {
                if self.session.is_none() {
                    warn!(%reason, "could not connect to server");
                    self.status.publish(StatusEvent::ConnectionFailed {
                        reason: reason.to_string(),
                    });
                    self.end_reason = Some(EndReason::Transport(reason));
                    dispatcher.stop();
                } else {
                    self.end(EndReason::Transport(reason), false, dispatcher, transport);
                }
            }
            NetEvent::Malformed { error, .. } => self.end(
                EndReason::Session(SessionError::Protocol(error)),
                true,
                dispatcher,
                transport,
            ),
            NetEvent::Accepted { .. } => {}
        }
    }

    fn on_frame(
        &mut self,
        body: &[u8],
        dispatcher: &mut Dispatcher<ClientEvent>,
        transport: &mut dyn Transport,
    ) {
        let now = dispatcher.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.handle_frame(body, now) {
            Ok(event) => self.on_session_event(event, dispatcher),
            Err(error) => {
                if let SessionError::IncompatibleVersion(version) = error {
                    self.status.publish(StatusEvent::Incompatible {
                        major: version.major,
                        minor: version.minor,
                    });
                }
                self.end(EndReason::Session(error), true, dispatcher, transport);
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent, dispatcher: &mut Dispatcher<ClientEvent>) {
        match event {
            SessionEvent::None => {}
            SessionEvent::Negotiated { tier, .. } => debug!(%tier, "greeting complete"),
            SessionEvent::Activated(_) => {
                info!(screen = %self.settings.screen_name, "connected to server");
                self.status.publish(StatusEvent::Connected {
                    screen: self.settings.screen_name.as_str().into(),
                });
            }
            SessionEvent::Message(msg) => self.apply(msg, dispatcher),
            SessionEvent::Clipboard(done) => self.on_server_clipboard(done),
            SessionEvent::Unsupported(tag) => debug!(%tag, "unsupported message"),
        }
    }

    /// Applies one message from the server.
    fn apply(&mut self, msg: Message, dispatcher: &mut Dispatcher<ClientEvent>) {
        let result = match msg {
            Message::QueryInfo => {
                self.send_info();
                Ok(())
            }
            Message::ResetOptions => {
                self.set_heartbeat(self.settings.session.heartbeat, dispatcher);
                Ok(())
            }
            Message::SetOptions(pairs) => {
                self.set_options(&pairs, dispatcher);
                Ok(())
            }
            Message::Enter { x, y, seq, mask } => {
                debug!(x, y, seq, "entering screen");
                self.seq.observe(seq);
                self.entered = true;
                self.screen.enter(i32::from(x), i32::from(y), mask)
            }
            Message::Leave => self.leave(),
            Message::ClipboardGrab { id, .. } => {
                self.on_server_grab(id);
                Ok(())
            }
            Message::ScreenSaver { on } => self.screen.screensaver(on),
            Message::KeyDown(key) => self.screen.apply_key(key, KeyPhase::Down),
            Message::KeyDownLang { key, .. } => self.screen.apply_key(key, KeyPhase::Down),
            Message::KeyRepeat { key, count } => self.screen.apply_key(key, KeyPhase::Repeat(count)),
            Message::KeyUp(key) => self.screen.apply_key(key, KeyPhase::Up),
            Message::MouseDown(button) => self.screen.apply_button(button, true),
            Message::MouseUp(button) => self.screen.apply_button(button, false),
            Message::MouseMove { x, y } => self.screen.apply_motion(i32::from(x), i32::from(y)),
            Message::MouseRelMove { dx, dy } => {
                self.screen.apply_relative_motion(i32::from(dx), i32::from(dy))
            }
            Message::MouseWheel { dx, dy } => self.screen.apply_wheel(i32::from(dx), i32::from(dy)),
            other => {
                trace!(kind = %other.kind(), "ignored");
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!(%error, "local screen rejected input");
        }
    }

    fn set_options(&mut self, pairs: &[u32], dispatcher: &mut Dispatcher<ClientEvent>) {
        for pair in pairs.chunks_exact(2) {
            if pair[0] == OPTION_HEARTBEAT {
                let mut heartbeat = self.heartbeat();
                heartbeat.interval = Duration::from_millis(u64::from(pair[1]));
                self.set_heartbeat(heartbeat, dispatcher);
            } else {
                trace!(option = pair[0], value = pair[1], "option ignored");
            }
        }
    }

    fn send_info(&mut self) {
        let info = screen_info(&self.screen);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.send(&Message::Info(info)) {
            Ok(()) => self.last_info = Some(info),
            Err(error) => warn!(%error, "could not send screen info"),
        }
    }

    fn leave(&mut self) -> Result<(), ScreenError> {
        debug!("leaving screen");
        self.entered = false;
        let result = self.screen.leave();
        for id in ClipboardId::ALL {
            if self.clipboards[id.index()].owned {
                self.send_clipboard(id);
            }
        }
        result
    }

    // ── Keep-alive ────────────────────────────────────────────────────────────

    fn set_heartbeat(&mut self, heartbeat: HeartbeatPolicy, dispatcher: &mut Dispatcher<ClientEvent>) {
        if let Some(session) = self.session.as_mut() {
            if session.heartbeat() == heartbeat {
                return;
            }
            debug!(interval = ?heartbeat.interval, "keep-alive rate changed");
            session.set_heartbeat(heartbeat);
        }
        self.restart_heartbeat_timer(dispatcher);
    }

    /// Re-arms the timer that checks the server is still talking.  A zero
    /// interval disables the check.
    fn restart_heartbeat_timer(&mut self, dispatcher: &mut Dispatcher<ClientEvent>) {
        if let Some(timer) = self.heartbeat_timer.take() {
            dispatcher.cancel_timer(timer);
        }
        let interval = self.heartbeat().interval;
        if !interval.is_zero() {
            self.heartbeat_timer = Some(dispatcher.adopt_timer(interval, true));
        }
    }

    fn on_timer(
        &mut self,
        id: TimerId,
        dispatcher: &mut Dispatcher<ClientEvent>,
        transport: &mut dyn Transport,
    ) {
        if self.heartbeat_timer != Some(id) {
            trace!(timer = %id, "stale timer");
            return;
        }
        let now = dispatcher.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(error) = session.check_heartbeat(now) {
            warn!("server is not responding");
            self.end(EndReason::Session(error), true, dispatcher, transport);
        }
    }

    // ── Clipboard ─────────────────────────────────────────────────────────────

    fn on_local_grab(&mut self, id: ClipboardId) {
        if !self.settings.clipboard_sharing || !self.is_active() {
            return;
        }
        if id.index() >= self.clipboards.len() {
            debug!(%id, "unknown clipboard");
            return;
        }
        let seq = self.seq.current();
        if let Some(session) = self.session.as_mut() {
            if let Err(error) = session.send(&Message::ClipboardGrab { id, seq }) {
                warn!(%id, %error, "clipboard grab not sent");
                return;
            }
        }
        debug!(%id, seq, "clipboard grabbed");
        let clipboard = &mut self.clipboards[id.index()];
        clipboard.owned = true;
        clipboard.sent = None;
        // The active screen sends on leave; an inactive one right away.
        if !self.entered {
            self.send_clipboard(id);
        }
    }

    /// Streams clipboard `id` unless the server already has this data.
    fn send_clipboard(&mut self, id: ClipboardId) {
        let Some(data) = self.screen.get_clipboard(id) else {
            return;
        };
        let clipboard = &mut self.clipboards[id.index()];
        if clipboard.sent.as_ref() == Some(&data) {
            trace!(%id, "clipboard unchanged");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.begin_clipboard(id, self.seq.current(), data.clone()) {
            Ok(()) => {
                debug!(%id, bytes = data.len(), "sending clipboard");
                clipboard.sent = Some(data);
            }
            Err(error) => warn!(%id, %error, "clipboard not sent"),
        }
    }

    /// Another screen took clipboard `id`.
    fn on_server_grab(&mut self, id: ClipboardId) {
        if let Some(clipboard) = self.clipboards.get_mut(id.index()) {
            *clipboard = OwnedClipboard::default();
        }
        if let Some(session) = self.session.as_mut() {
            session.cancel_clipboard(id);
        }
    }

    fn on_server_clipboard(&mut self, done: CompletedClipboard) {
        if !self.settings.clipboard_sharing {
            return;
        }
        debug!(id = %done.id, bytes = done.data.len(), "clipboard received");
        if let Err(error) = self.screen.set_clipboard(done.id, &done.data) {
            warn!(%error, "could not update the local clipboard");
        }
        if let Some(clipboard) = self.clipboards.get_mut(done.id.index()) {
            *clipboard = OwnedClipboard::default();
        }
    }

    // ── Local events ──────────────────────────────────────────────────────────

    fn on_screen_changed(&mut self) {
        let info = screen_info(&self.screen);
        let changed = self
            .last_info
            .map_or(true, |last| screen_info_changed(&last, &info));
        if changed && self.is_active() {
            info!(width = info.width, height = info.height, "screen changed");
            self.send_info();
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    fn end(
        &mut self,
        reason: EndReason,
        socket_open: bool,
        dispatcher: &mut Dispatcher<ClientEvent>,
        transport: &mut dyn Transport,
    ) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if socket_open {
            session.flush(transport);
            transport.close(session.token());
        }
        session.mark_closed();
        if self.entered {
            self.entered = false;
            if let Err(error) = self.screen.leave() {
                warn!(%error, "local screen did not release the cursor");
            }
        }
        if let Some(timer) = self.heartbeat_timer.take() {
            dispatcher.cancel_timer(timer);
        }
        info!(%reason, "disconnected from server");
        self.status.publish(StatusEvent::Disconnected {
            screen: None,
            reason: reason.to_string(),
        });
        self.end_reason = Some(reason);
        dispatcher.stop();
    }

    fn shutdown(&mut self, dispatcher: &mut Dispatcher<ClientEvent>, transport: &mut dyn Transport) {
        match self.session.as_mut() {
            Some(session) => {
                session.close();
                self.end(EndReason::Shutdown, true, dispatcher, transport);
            }
            None => {
                if let Some(token) = self.server {
                    transport.close(token);
                }
                dispatcher.stop();
            }
        }
        self.status.publish(StatusEvent::Stopped);
    }

    /// Hands queued frames to the transport and moves clipboard transfers
    /// forward by one chunk.
    fn pump(&mut self, dispatcher: &mut Dispatcher<ClientEvent>, transport: &mut dyn Transport) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.flush(transport);
        if transport.backlog(session.token()) == 0 && session.step_clipboard() {
            session.flush(transport);
            if !session.is_clipboard_idle() && !self.pump_posted {
                self.pump_posted = true;
                dispatcher.post_user(ClientEvent::Pump);
            }
        }
    }
}

impl<S: ScreenBackend, St: StatusSink> Handler<ClientEvent> for Client<S, St> {
    fn handle(
        &mut self,
        event: Event<ClientEvent>,
        dispatcher: &mut Dispatcher<ClientEvent>,
        transport: &mut dyn Transport,
    ) {
        match event {
            Event::Net(net) => self.on_net(net, dispatcher, transport),
            Event::Timer(id) => self.on_timer(id, dispatcher, transport),
            Event::User(ClientEvent::ClipboardGrabbed(id)) => self.on_local_grab(id),
            Event::User(ClientEvent::ScreenChanged) => self.on_screen_changed(),
            Event::User(ClientEvent::Pump) => self.pump_posted = false,
            Event::User(ClientEvent::Shutdown) => {
                self.shutdown(dispatcher, transport);
                return;
            }
        }
        self.pump(dispatcher, transport);
    }
}
