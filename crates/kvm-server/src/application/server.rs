//! Server orchestrator: decides which screen owns the keyboard and mouse.
//!
//! [`Server`] is the [`Handler`] the server's event loop drives.  It owns the
//! topology, the switch policy, the rule engine and one session per client
//! connection, and it is the only place where the active owner changes.
//!
//! # Event flow (for beginners)
//!
//! ```text
//! capture backend ──► ServerEvent::Input ──► rules ──► active owner
//!                                              │
//!                                              └──► actions (switch, lock, …)
//!
//! socket ──► NetEvent::Frame ──► Session ──► SessionEvent ──► Server
//!
//! keep-alive timer ──► CALV to every client, silent clients are ended
//! ```
//!
//! While the local screen is active the capture backend reports absolute
//! cursor positions (`PrimaryMotion`).  Once a client screen is active the
//! local cursor is parked and the backend reports raw deltas
//! (`SecondaryMotion`); the server tracks the cursor on the client screen
//! itself and sends absolute positions.
//!
//! Session endings are never handled in the middle of another event: they are
//! posted as [`ServerEvent::SessionEnded`] and processed on the next dispatcher
//! turn, so the client table never changes under an iteration.

use std::fmt;
use std::time::Instant;

use kvm_core::domain::{
    Action, Direction, EdgeHit, Neighbor, RuleEngine, RuleInput, ScreenName, ScreenShape,
    SwitchDecision, SwitchOptions, SwitchPolicy, TopologyGraph,
};
use kvm_core::keymap::{ButtonId, KeyId, ModifierMask};
use kvm_core::protocol::messages::{ClipboardId, KeyEvent, ScreenInfo, OPTION_HEARTBEAT};
use kvm_core::protocol::transfer::CompletedClipboard;
use kvm_core::protocol::EnterSequence;
use kvm_core::screen::KeyPhase;
use kvm_core::session::Refusal;
use kvm_core::{
    CloseReason, Dispatcher, Event, Handler, Message, NetEvent, ScreenBackend, Session,
    SessionConfig, SessionError, SessionEvent, StatusEvent, StatusSink, TimerId, Token, Transport,
};
use tracing::{debug, info, trace, warn};

use crate::application::client_registry::{ClientEntry, ClientRegistry};

// ── Events ────────────────────────────────────────────────────────────────────

/// Local input reported by the capture backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(KeyEvent),
    KeyRepeat { key: KeyEvent, count: u16 },
    KeyUp(KeyEvent),
    MouseDown(ButtonId),
    MouseUp(ButtonId),
    /// Absolute cursor position while the local screen is active.
    PrimaryMotion { x: i32, y: i32 },
    /// Raw motion while a client screen is active.
    SecondaryMotion { dx: i32, dy: i32 },
    Wheel { dx: i32, dy: i32 },
    /// The user copied something on the local screen.
    ClipboardGrabbed(ClipboardId),
    ScreenSaver(bool),
}

/// Why a client session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Session(SessionError),
    Transport(CloseReason),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Session(error) => error.fmt(f),
            EndReason::Transport(reason) => reason.fmt(f),
        }
    }
}

/// Events of the server's event loop besides network events and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Input(InputEvent),
    SessionEnded { token: Token, reason: EndReason },
    /// Continue streaming clipboard chunks.
    Pump,
    /// Say goodbye to every client and stop the loop.
    Shutdown,
}

/// The screen currently receiving keyboard and mouse input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveOwner {
    Local,
    Client(Token),
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Validated server settings, built from the configuration file.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Name of the local screen; must be part of `topology`.
    pub screen_name: ScreenName,
    pub topology: TopologyGraph,
    pub switch: SwitchOptions,
    pub rules: RuleEngine,
    pub session: SessionConfig,
    /// Width of the band along the local screen's borders that counts as
    /// touching the border.
    pub jump_zone: i32,
    /// Send cursor deltas instead of absolute positions to client screens.
    pub relative_moves: bool,
    pub clipboard_sharing: bool,
}

impl ServerSettings {
    pub fn new(screen_name: ScreenName, topology: TopologyGraph) -> Self {
        Self {
            screen_name,
            topology,
            switch: SwitchOptions::default(),
            rules: RuleEngine::default(),
            session: SessionConfig::default(),
            jump_zone: 1,
            relative_moves: false,
            clipboard_sharing: true,
        }
    }
}

// ── Clipboard ownership ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SharedClipboard {
    owner: Option<ActiveOwner>,
    /// Latest contents, `None` until the owning client sends them.
    data: Option<Vec<u8>>,
    /// Bumped whenever ownership or contents change.
    generation: u64,
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The server orchestrator.
pub struct Server<S, St> {
    settings: ServerSettings,
    screen: S,
    status: St,
    clients: ClientRegistry,
    owner: ActiveOwner,
    /// Cursor position on the active client screen.
    cursor: (i32, i32),
    seq: EnterSequence,
    policy: SwitchPolicy,
    wait_timer: Option<TimerId>,
    keep_alive_timer: Option<TimerId>,
    modifiers: ModifierMask,
    buttons_down: Vec<ButtonId>,
    /// Keys whose press a rule consumed; their repeats and release stay local.
    rule_keys: Vec<KeyId>,
    locked: bool,
    /// Broadcast target list while keyboard broadcasting is on.
    broadcast: Option<Vec<ScreenName>>,
    clipboards: [SharedClipboard; ClipboardId::ALL.len()],
    pump_posted: bool,
    restart_requested: bool,
}

impl<S: ScreenBackend, St: StatusSink> Server<S, St> {
    pub fn new(settings: ServerSettings, screen: S, status: St) -> Self {
        let policy = SwitchPolicy::new(settings.switch.clone());
        Self {
            settings,
            screen,
            status,
            clients: ClientRegistry::new(),
            owner: ActiveOwner::Local,
            cursor: (0, 0),
            seq: EnterSequence::new(),
            policy,
            wait_timer: None,
            keep_alive_timer: None,
            modifiers: ModifierMask::NONE,
            buttons_down: Vec::new(),
            rule_keys: Vec::new(),
            locked: false,
            broadcast: None,
            clipboards: Default::default(),
            pump_posted: false,
            restart_requested: false,
        }
    }

    /// Starts the keep-alive timer.  Call once before running the loop.
    pub fn start(&mut self, dispatcher: &mut Dispatcher<ServerEvent>) {
        let interval = self.settings.session.heartbeat.interval;
        self.keep_alive_timer = Some(dispatcher.adopt_timer(interval, true));
        info!(
            screen = %self.settings.screen_name,
            screens = self.settings.topology.len(),
            rules = self.settings.rules.len(),
            "server started"
        );
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn owner(&self) -> ActiveOwner {
        self.owner
    }

    /// Name of the screen that currently owns input.
    pub fn active_screen(&self) -> ScreenName {
        match self.owner {
            ActiveOwner::Local => self.settings.screen_name.clone(),
            ActiveOwner::Client(token) => self
                .clients
                .get(token)
                .and_then(|entry| entry.screen.clone())
                .unwrap_or_else(|| self.settings.screen_name.clone()),
        }
    }

    /// Cursor position on the active client screen.
    pub fn client_cursor(&self) -> Option<(i32, i32)> {
        matches!(self.owner, ActiveOwner::Client(_)).then_some(self.cursor)
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
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

    pub fn status_mut(&mut self) -> &mut St {
        &mut self.status
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcast.is_some()
    }

    /// The sequence number of the latest enter.
    pub fn enter_sequence(&self) -> u32 {
        self.seq.current()
    }

    /// `true` once a rule asked for a restart; the loop has been stopped.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    // ── Network ───────────────────────────────────────────────────────────────

    fn on_net(
        &mut self,
        event: NetEvent,
        dispatcher: &mut Dispatcher<ServerEvent>,
        transport: &mut dyn Transport,
    ) {
        let now = dispatcher.now();
        match event {
            NetEvent::Accepted { token, peer, .. } => {
                info!(%token, %peer, "client connected");
                let session = Session::server(token, self.settings.session.clone(), now);
                self.clients.insert(ClientEntry::new(session));
            }
            NetEvent::Frame { token, body } => self.on_frame(token, &body, now, dispatcher),
            NetEvent::Drained(_) => {}
            NetEvent::Closed { token, reason } => {
                self.end_session(token, &EndReason::Transport(reason), false, dispatcher, transport);
            }
            NetEvent::Malformed { token, error } => dispatcher.post_user(ServerEvent::SessionEnded {
                token,
                reason: EndReason::Session(SessionError::Protocol(error)),
            }),
            NetEvent::Connected(token) => debug!(%token, "unexpected outbound connection"),
        }
    }

    fn on_frame(
        &mut self,
        token: Token,
        body: &[u8],
        now: Instant,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) {
        let Some(entry) = self.clients.get_mut(token) else {
            return;
        };
        match entry.session.handle_frame(body, now) {
            Ok(event) => self.on_session_event(token, event, dispatcher),
            Err(error) => {
                if let SessionError::IncompatibleVersion(version) = error {
                    self.status.publish(StatusEvent::Incompatible {
                        major: version.major,
                        minor: version.minor,
                    });
                }
                dispatcher.post_user(ServerEvent::SessionEnded {
                    token,
                    reason: EndReason::Session(error),
                });
            }
        }
    }

    fn on_session_event(
        &mut self,
        token: Token,
        event: SessionEvent,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) {
        match event {
            SessionEvent::None => {}
            SessionEvent::Unsupported(tag) => trace!(%token, %tag, "unsupported message"),
            SessionEvent::Negotiated { name, .. } => {
                self.admit(token, ScreenName::new(name), dispatcher);
            }
            SessionEvent::Activated(info) => self.on_activated(token, info, dispatcher),
            SessionEvent::Message(Message::Info(info)) => self.on_info_changed(token, info),
            SessionEvent::Message(Message::ClipboardGrab { id, seq }) => {
                self.on_client_grab(token, id, seq);
            }
            SessionEvent::Message(other) => trace!(%token, kind = %other.kind(), "ignored"),
            SessionEvent::Clipboard(done) => self.on_client_clipboard(token, done),
        }
    }

    /// Checks the greeted screen name and either asks for screen info or
    /// turns the client away.
    fn admit(&mut self, token: Token, name: ScreenName, dispatcher: &mut Dispatcher<ServerEvent>) {
        let refusal = if !self.settings.topology.contains(&name) {
            Some(Refusal::UnknownScreen)
        } else if name == self.settings.screen_name || self.clients.find_by_name(&name).is_some() {
            Some(Refusal::Busy)
        } else {
            None
        };
        let Some(entry) = self.clients.get_mut(token) else {
            return;
        };
        let result = match refusal {
            Some(refusal) => {
                warn!(%token, screen = %name, %refusal, "client refused");
                entry.session.refuse(refusal);
                Err(SessionError::Rejected(refusal))
            }
            None => entry.session.accept(),
        };
        match result {
            Ok(()) => {
                debug!(%token, screen = %name, "client admitted");
                entry.screen = Some(name);
            }
            Err(error) => dispatcher.post_user(ServerEvent::SessionEnded {
                token,
                reason: EndReason::Session(error),
            }),
        }
    }

    fn on_activated(
        &mut self,
        token: Token,
        info: ScreenInfo,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) {
        let interval = self.settings.session.heartbeat.interval;
        let Some(entry) = self.clients.get_mut(token) else {
            return;
        };
        entry.info = Some(info);
        let Some(name) = entry.screen.clone() else {
            return;
        };
        if entry
            .session
            .tier()
            .is_some_and(|tier| tier.capabilities().keep_alive)
        {
            let millis = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
            for msg in [
                Message::ResetOptions,
                Message::SetOptions(vec![OPTION_HEARTBEAT, millis]),
            ] {
                if let Err(error) = entry.session.send(&msg) {
                    warn!(%token, %error, "could not send options");
                }
            }
        }
        info!(
            %token,
            screen = %name,
            width = info.width,
            height = info.height,
            "client screen active"
        );
        self.status.publish(StatusEvent::Connected {
            screen: name.clone(),
        });
        self.publish_client_list();

        let evaluation = self.settings.rules.evaluate(&RuleInput::ScreenConnected(name));
        self.run_actions(evaluation.actions, dispatcher);
    }

    fn on_info_changed(&mut self, token: Token, info: ScreenInfo) {
        let Some(entry) = self.clients.get_mut(token) else {
            return;
        };
        debug!(%token, width = info.width, height = info.height, "client screen changed");
        entry.info = Some(info);
        if self.owner == ActiveOwner::Client(token) {
            let shape = ScreenShape::from(info);
            self.cursor = shape.clamp(self.cursor.0, self.cursor.1);
        }
    }

    // ── Session teardown ──────────────────────────────────────────────────────

    fn end_session(
        &mut self,
        token: Token,
        reason: &EndReason,
        socket_open: bool,
        dispatcher: &mut Dispatcher<ServerEvent>,
        transport: &mut dyn Transport,
    ) {
        let Some(mut entry) = self.clients.remove(token) else {
            return;
        };
        if socket_open {
            if let EndReason::Session(
                SessionError::Protocol(_)
                | SessionError::UnexpectedMessage { .. }
                | SessionError::WrongProtocol { .. },
            ) = reason
            {
                entry.session.refuse(Refusal::Bad);
            }
            entry.session.flush(transport);
            transport.close(token);
        }
        entry.session.mark_closed();
        info!(%token, screen = ?entry.screen, %reason, "client session ended");

        if self.owner == ActiveOwner::Client(token) {
            self.jump_home(dispatcher);
        }
        if let Some(screen) = entry.screen {
            self.status.publish(StatusEvent::Disconnected {
                screen: Some(screen),
                reason: reason.to_string(),
            });
            self.publish_client_list();
        }
    }

    /// The active client vanished: put the cursor back on the local screen.
    fn jump_home(&mut self, dispatcher: &mut Dispatcher<ServerEvent>) {
        self.policy.reset();
        self.cancel_wait(dispatcher);
        let (x, y) = self.screen.shape().center();
        let seq = self.seq.advance();
        self.owner = ActiveOwner::Local;
        if let Err(error) = self.screen.enter(x, y, self.modifiers) {
            warn!(%error, "local screen did not accept the cursor");
        }
        info!(x, y, seq, "cursor returned to the local screen");
        self.status.publish(StatusEvent::Switched {
            screen: self.settings.screen_name.clone(),
        });
    }

    fn shutdown(&mut self, dispatcher: &mut Dispatcher<ServerEvent>, transport: &mut dyn Transport) {
        for token in self.clients.tokens() {
            if let Some(mut entry) = self.clients.remove(token) {
                entry.session.close();
                entry.session.flush(transport);
                transport.close(token);
                entry.session.mark_closed();
            }
        }
        for timer in [self.keep_alive_timer.take(), self.wait_timer.take()]
            .into_iter()
            .flatten()
        {
            dispatcher.cancel_timer(timer);
        }
        info!("server stopped");
        self.status.publish(StatusEvent::Stopped);
        dispatcher.stop();
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    fn on_timer(&mut self, id: TimerId, dispatcher: &mut Dispatcher<ServerEvent>) {
        if self.keep_alive_timer == Some(id) {
            self.keep_alive(dispatcher);
        } else if self.wait_timer == Some(id) {
            self.wait_timer = None;
            self.on_wait_expired(dispatcher);
        } else {
            trace!(timer = %id, "stale timer");
        }
    }

    fn keep_alive(&mut self, dispatcher: &mut Dispatcher<ServerEvent>) {
        let now = dispatcher.now();
        for token in self.clients.tokens() {
            let Some(entry) = self.clients.get_mut(token) else {
                continue;
            };
            if let Err(error) = entry.session.check_heartbeat(now) {
                warn!(%token, screen = ?entry.screen, "client stopped answering");
                dispatcher.post_user(ServerEvent::SessionEnded {
                    token,
                    reason: EndReason::Session(error),
                });
                continue;
            }
            entry.session.send_keep_alive();
        }
    }

    fn on_wait_expired(&mut self, dispatcher: &mut Dispatcher<ServerEvent>) {
        let Some(pending) = self.policy.wait_expired() else {
            return;
        };
        let Some(shape) = self.active_shape() else {
            return;
        };
        let t = shape.fraction_at(pending.direction, pending.x, pending.y);
        match self.usable_neighbor(pending.direction, t) {
            Some(neighbor) => self.switch_across(pending.direction, &neighbor, dispatcher),
            None => debug!(target = %pending.target, "switch target went away while waiting"),
        }
    }

    fn cancel_wait(&mut self, dispatcher: &mut Dispatcher<ServerEvent>) {
        if let Some(timer) = self.wait_timer.take() {
            dispatcher.cancel_timer(timer);
        }
    }

    // ── Local input ───────────────────────────────────────────────────────────

    fn on_input(&mut self, input: InputEvent, dispatcher: &mut Dispatcher<ServerEvent>) {
        match input {
            InputEvent::KeyDown(key) => {
                self.modifiers = key.mask;
                let evaluation = self.settings.rules.evaluate(&RuleInput::KeyDown {
                    key: key.id,
                    mask: key.mask,
                });
                if evaluation.consumed {
                    self.rule_keys.push(key.id);
                } else {
                    self.send_key(&Message::KeyDown(key));
                }
                self.run_actions(evaluation.actions, dispatcher);
            }
            InputEvent::KeyRepeat { key, count } => {
                if !self.rule_keys.contains(&key.id) {
                    self.send_key(&Message::KeyRepeat { key, count });
                }
            }
            InputEvent::KeyUp(key) => {
                self.modifiers = key.mask;
                let evaluation = self.settings.rules.evaluate(&RuleInput::KeyUp {
                    key: key.id,
                    mask: key.mask,
                });
                let held_by_rule = match self.rule_keys.iter().position(|k| *k == key.id) {
                    Some(index) => {
                        self.rule_keys.remove(index);
                        true
                    }
                    None => false,
                };
                if !evaluation.consumed && !held_by_rule {
                    self.send_key(&Message::KeyUp(key));
                }
                self.run_actions(evaluation.actions, dispatcher);
            }
            InputEvent::MouseDown(button) => {
                let evaluation = self.settings.rules.evaluate(&RuleInput::ButtonDown {
                    button,
                    mask: self.modifiers,
                });
                if !evaluation.consumed {
                    self.buttons_down.push(button);
                    self.send_to_owner(&Message::MouseDown(button));
                }
                self.run_actions(evaluation.actions, dispatcher);
            }
            InputEvent::MouseUp(button) => {
                let evaluation = self.settings.rules.evaluate(&RuleInput::ButtonUp {
                    button,
                    mask: self.modifiers,
                });
                if let Some(index) = self.buttons_down.iter().position(|b| *b == button) {
                    self.buttons_down.remove(index);
                    self.send_to_owner(&Message::MouseUp(button));
                }
                self.run_actions(evaluation.actions, dispatcher);
            }
            InputEvent::PrimaryMotion { x, y } => self.on_primary_motion(x, y, dispatcher),
            InputEvent::SecondaryMotion { dx, dy } => self.on_secondary_motion(dx, dy, dispatcher),
            InputEvent::Wheel { dx, dy } => self.send_to_owner(&Message::MouseWheel {
                dx: to_wire(dx),
                dy: to_wire(dy),
            }),
            InputEvent::ClipboardGrabbed(id) => self.on_local_grab(id),
            InputEvent::ScreenSaver(on) => {
                debug!(on, "screen saver");
                for token in self.clients.tokens() {
                    if self.clients.get(token).is_some_and(ClientEntry::is_active) {
                        self.send_to(token, &Message::ScreenSaver { on });
                    }
                }
            }
        }
    }

    fn on_primary_motion(&mut self, x: i32, y: i32, dispatcher: &mut Dispatcher<ServerEvent>) {
        if self.owner != ActiveOwner::Local {
            trace!(x, y, "primary motion while a client is active");
            return;
        }
        let shape = self.screen.shape();
        let zone = self.settings.jump_zone;
        match shape.edge_at(x, y, zone) {
            Some(direction) => {
                self.on_edge(direction, x, y, shape, dispatcher);
            }
            None => {
                self.policy.no_switch(x, y, shape, zone, dispatcher.now());
                self.cancel_wait(dispatcher);
            }
        }
    }

    fn on_secondary_motion(&mut self, dx: i32, dy: i32, dispatcher: &mut Dispatcher<ServerEvent>) {
        let ActiveOwner::Client(token) = self.owner else {
            trace!(dx, dy, "secondary motion while the local screen is active");
            return;
        };
        let Some(shape) = self.clients.get(token).and_then(ClientEntry::shape) else {
            return;
        };
        let (old_x, old_y) = self.cursor;
        let (x, y) = (old_x + dx, old_y + dy);
        let (x, y) = match shape.edge_at(x, y, 0) {
            Some(direction) => {
                let (x, y) = shape.clamp(x, y);
                self.cursor = (x, y);
                if self.on_edge(direction, x, y, shape, dispatcher) {
                    return;
                }
                (x, y)
            }
            None => {
                self.policy.no_switch(x, y, shape, 0, dispatcher.now());
                self.cancel_wait(dispatcher);
                (x, y)
            }
        };
        self.cursor = (x, y);
        if (x, y) == (old_x, old_y) {
            return;
        }
        let msg = if self.settings.relative_moves {
            Message::MouseRelMove {
                dx: to_wire(x - old_x),
                dy: to_wire(y - old_y),
            }
        } else {
            Message::MouseMove {
                x: to_wire(x),
                y: to_wire(y),
            }
        };
        self.send_to(token, &msg);
    }

    /// The cursor touches the `direction` border of the active screen.
    /// Returns `true` if the active screen changed.
    fn on_edge(
        &mut self,
        direction: Direction,
        x: i32,
        y: i32,
        shape: ScreenShape,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) -> bool {
        let t = shape.fraction_at(direction, x, y);
        let neighbor = self.usable_neighbor(direction, t);
        let hit = EdgeHit {
            direction,
            target: neighbor.as_ref().map(|n| &n.screen),
            x,
            y,
            shape,
            modifiers: self.modifiers,
            locked: self.is_locked_to_screen(),
        };
        match self.policy.evaluate(hit, dispatcher.now()) {
            SwitchDecision::Switch => match neighbor {
                Some(neighbor) => {
                    self.switch_across(direction, &neighbor, dispatcher);
                    true
                }
                None => false,
            },
            SwitchDecision::Wait(delay) => {
                self.cancel_wait(dispatcher);
                self.wait_timer = Some(dispatcher.adopt_timer(delay, false));
                false
            }
            SwitchDecision::Hold => false,
            SwitchDecision::Blocked(reason) => {
                trace!(?reason, %direction, "no switch");
                self.cancel_wait(dispatcher);
                false
            }
        }
    }

    /// Mouse buttons held down or an explicit lock keep the cursor on the
    /// active screen.
    fn is_locked_to_screen(&self) -> bool {
        self.locked || !self.buttons_down.is_empty()
    }

    // ── Switching ─────────────────────────────────────────────────────────────

    /// The local screen or an active client screen.
    fn is_usable(&self, name: &ScreenName) -> bool {
        *name == self.settings.screen_name || self.clients.find_active(name).is_some()
    }

    fn usable_neighbor(&self, direction: Direction, t: f64) -> Option<Neighbor> {
        let current = self.active_screen();
        self.settings
            .topology
            .resolve_usable_neighbor(&current, direction, t, |name| self.is_usable(name))
    }

    fn shape_of(&self, name: &ScreenName) -> Option<ScreenShape> {
        if *name == self.settings.screen_name {
            return Some(self.screen.shape());
        }
        let token = self.clients.find_active(name)?;
        self.clients.get(token).and_then(ClientEntry::shape)
    }

    fn active_shape(&self) -> Option<ScreenShape> {
        match self.owner {
            ActiveOwner::Local => Some(self.screen.shape()),
            ActiveOwner::Client(token) => self.clients.get(token).and_then(ClientEntry::shape),
        }
    }

    fn active_cursor(&self) -> (i32, i32) {
        match self.owner {
            ActiveOwner::Local => self.screen.cursor_position(),
            ActiveOwner::Client(_) => self.cursor,
        }
    }

    /// Crosses into `neighbor` at the mirrored position on its entry edge.
    fn switch_across(
        &mut self,
        direction: Direction,
        neighbor: &Neighbor,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) {
        let Some(shape) = self.shape_of(&neighbor.screen) else {
            return;
        };
        // Entering the local screen lands outside the jump zone, or the next
        // motion would bounce straight back.
        let inset = if neighbor.screen == self.settings.screen_name {
            self.settings.jump_zone
        } else {
            0
        };
        let (x, y) = shape.entry_point(direction, neighbor.t, inset);
        self.switch_to(&neighbor.screen, x, y, dispatcher);
    }

    /// Moves the cursor to the center of `name`.
    fn jump_to(&mut self, name: &ScreenName, dispatcher: &mut Dispatcher<ServerEvent>) {
        match self.shape_of(name) {
            Some(shape) => {
                let (x, y) = shape.center();
                self.switch_to(name, x, y, dispatcher);
            }
            None => warn!(screen = %name, "switch target is not connected"),
        }
    }

    fn switch_in_direction(&mut self, direction: Direction, dispatcher: &mut Dispatcher<ServerEvent>) {
        let Some(shape) = self.active_shape() else {
            return;
        };
        let (x, y) = self.active_cursor();
        let t = shape.fraction_at(direction, x, y);
        match self.usable_neighbor(direction, t) {
            Some(neighbor) => self.switch_across(direction, &neighbor, dispatcher),
            None => debug!(%direction, "no screen in that direction"),
        }
    }

    /// Makes `target` the active owner with the cursor at `(x, y)`.
    fn switch_to(
        &mut self,
        target: &ScreenName,
        x: i32,
        y: i32,
        dispatcher: &mut Dispatcher<ServerEvent>,
    ) {
        let new_owner = if *target == self.settings.screen_name {
            ActiveOwner::Local
        } else {
            match self.clients.find_active(target) {
                Some(token) => ActiveOwner::Client(token),
                None => {
                    warn!(screen = %target, "switch target is not connected");
                    return;
                }
            }
        };
        self.policy.reset();
        self.cancel_wait(dispatcher);

        if new_owner == self.owner {
            match new_owner {
                ActiveOwner::Local => {
                    if let Err(error) = self.screen.warp(x, y) {
                        warn!(%error, "could not move the local cursor");
                    }
                }
                ActiveOwner::Client(token) => {
                    self.cursor = (x, y);
                    self.send_to(
                        token,
                        &Message::MouseMove {
                            x: to_wire(x),
                            y: to_wire(y),
                        },
                    );
                }
            }
            return;
        }

        match self.owner {
            ActiveOwner::Local => {
                if let Err(error) = self.screen.leave() {
                    warn!(%error, "local screen did not release the cursor");
                }
            }
            ActiveOwner::Client(token) => self.send_to(token, &Message::Leave),
        }

        let seq = self.seq.advance();
        self.owner = new_owner;
        match new_owner {
            ActiveOwner::Local => {
                if let Err(error) = self.screen.enter(x, y, self.modifiers) {
                    warn!(%error, "local screen did not accept the cursor");
                }
            }
            ActiveOwner::Client(token) => {
                self.cursor = (x, y);
                self.send_to(
                    token,
                    &Message::Enter {
                        x: to_wire(x),
                        y: to_wire(y),
                        seq,
                        mask: self.modifiers,
                    },
                );
                self.send_clipboards(token, seq);
            }
        }
        info!(screen = %target, x, y, seq, "switched screen");
        self.status.publish(StatusEvent::Switched {
            screen: target.clone(),
        });
    }

    // ── Rule actions ──────────────────────────────────────────────────────────

    fn run_actions(&mut self, actions: Vec<Action>, dispatcher: &mut Dispatcher<ServerEvent>) {
        for action in actions {
            debug!(?action, "rule action");
            match action {
                Action::SwitchToScreen(screen) => self.jump_to(&screen, dispatcher),
                Action::SwitchInDirection(direction) => {
                    self.switch_in_direction(direction, dispatcher);
                }
                Action::SwitchToNextScreen => {
                    let current = self.active_screen();
                    let next = self
                        .settings
                        .topology
                        .next_screen(&current, |name| self.is_usable(name))
                        .cloned();
                    match next {
                        Some(next) => self.jump_to(&next, dispatcher),
                        None => debug!("no other screen connected"),
                    }
                }
                Action::LockCursor(mode) => {
                    self.locked = mode.apply(self.locked);
                    info!(locked = self.locked, "cursor lock");
                }
                Action::KeyboardBroadcast { mode, screens } => {
                    let on = mode.apply(self.broadcast.is_some());
                    self.broadcast = on.then_some(screens);
                    info!(on, "keyboard broadcast");
                }
                Action::Keystroke {
                    key,
                    mask,
                    down,
                    screens,
                } => self.inject_key(key, mask, down, &screens),
                Action::MouseButton { button, down } => self.inject_button(button, down),
                Action::RestartServer => {
                    info!("restart requested");
                    self.restart_requested = true;
                    self.status.publish(StatusEvent::RestartRequested);
                    dispatcher.post_user(ServerEvent::Shutdown);
                }
            }
        }
    }

    fn inject_key(&mut self, key: KeyId, mask: ModifierMask, down: bool, screens: &[ScreenName]) {
        let event = KeyEvent { id: key, mask, button: 0 };
        let (msg, phase) = if down {
            (Message::KeyDown(event), KeyPhase::Down)
        } else {
            (Message::KeyUp(event), KeyPhase::Up)
        };
        let targets: Vec<ActiveOwner> = if screens.is_empty() {
            vec![self.owner]
        } else {
            screens
                .iter()
                .filter_map(|name| {
                    if *name == self.settings.screen_name {
                        Some(ActiveOwner::Local)
                    } else {
                        self.clients.find_active(name).map(ActiveOwner::Client)
                    }
                })
                .collect()
        };
        for target in targets {
            match target {
                ActiveOwner::Local => {
                    if let Err(error) = self.screen.apply_key(event, phase) {
                        warn!(%error, "could not inject keystroke");
                    }
                }
                ActiveOwner::Client(token) => self.send_to(token, &msg),
            }
        }
    }

    fn inject_button(&mut self, button: ButtonId, down: bool) {
        match self.owner {
            ActiveOwner::Local => {
                if let Err(error) = self.screen.apply_button(button, down) {
                    warn!(%error, "could not inject mouse button");
                }
            }
            ActiveOwner::Client(token) => {
                let msg = if down {
                    Message::MouseDown(button)
                } else {
                    Message::MouseUp(button)
                };
                self.send_to(token, &msg);
            }
        }
    }

    // ── Clipboard ─────────────────────────────────────────────────────────────

    fn on_local_grab(&mut self, id: ClipboardId) {
        if !self.settings.clipboard_sharing {
            return;
        }
        let data = self.screen.get_clipboard(id);
        let Some(shared) = self.clipboards.get_mut(id.index()) else {
            return;
        };
        shared.owner = Some(ActiveOwner::Local);
        shared.data = data;
        shared.generation += 1;
        debug!(%id, "local clipboard grabbed");
        self.announce_grab(id, None);
    }

    fn on_client_grab(&mut self, token: Token, id: ClipboardId, seq: u32) {
        if !self.settings.clipboard_sharing {
            return;
        }
        if !self.seq.is_current(seq) {
            debug!(%token, %id, seq, current = self.seq.current(), "stale clipboard grab ignored");
            return;
        }
        let Some(shared) = self.clipboards.get_mut(id.index()) else {
            return;
        };
        shared.owner = Some(ActiveOwner::Client(token));
        shared.data = None;
        shared.generation += 1;
        debug!(%token, %id, "client clipboard grabbed");
        self.announce_grab(id, Some(token));
    }

    /// Tells every active client except `owner` that it lost clipboard `id`.
    fn announce_grab(&mut self, id: ClipboardId, owner: Option<Token>) {
        let seq = self.seq.current();
        for entry in self.clients.iter_mut() {
            if !entry.is_active() || Some(entry.token()) == owner {
                continue;
            }
            entry.session.cancel_clipboard(id);
            if let Err(error) = entry.session.send(&Message::ClipboardGrab { id, seq }) {
                debug!(token = %entry.token(), %error, "clipboard grab not sent");
            }
        }
    }

    fn on_client_clipboard(&mut self, token: Token, done: CompletedClipboard) {
        if !self.settings.clipboard_sharing {
            return;
        }
        let Some(shared) = self.clipboards.get_mut(done.id.index()) else {
            return;
        };
        if shared.owner != Some(ActiveOwner::Client(token)) {
            debug!(%token, id = %done.id, "clipboard data from a non-owner ignored");
            return;
        }
        if let Err(error) = self.screen.set_clipboard(done.id, &done.data) {
            warn!(%error, "could not update the local clipboard");
        }
        shared.data = Some(done.data);
        shared.generation += 1;
        let generation = shared.generation;
        if let Some(entry) = self.clients.get_mut(token) {
            entry.mark_clipboard_sent(done.id, generation);
        }
    }

    /// Streams every clipboard the entering client does not have yet.
    fn send_clipboards(&mut self, token: Token, seq: u32) {
        if !self.settings.clipboard_sharing {
            return;
        }
        let Some(entry) = self.clients.get_mut(token) else {
            return;
        };
        for id in ClipboardId::ALL {
            let shared = &self.clipboards[id.index()];
            if shared.owner == Some(ActiveOwner::Client(token))
                || entry.has_clipboard(id, shared.generation)
            {
                continue;
            }
            let Some(data) = shared.data.clone() else {
                continue;
            };
            match entry.session.begin_clipboard(id, seq, data) {
                Ok(()) => entry.mark_clipboard_sent(id, shared.generation),
                Err(error) => warn!(%token, %id, %error, "clipboard not sent"),
            }
        }
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    fn send_to(&mut self, token: Token, msg: &Message) {
        if let Some(entry) = self.clients.get_mut(token) {
            if let Err(error) = entry.session.send(msg) {
                debug!(%token, kind = %msg.kind(), %error, "message not sent");
            }
        }
    }

    fn send_to_owner(&mut self, msg: &Message) {
        if let ActiveOwner::Client(token) = self.owner {
            self.send_to(token, msg);
        }
    }

    /// Sends a key event to the active client and, while broadcasting, to
    /// every listed client as well.
    fn send_key(&mut self, msg: &Message) {
        let mut targets = Vec::new();
        if let ActiveOwner::Client(token) = self.owner {
            targets.push(token);
        }
        if let Some(screens) = &self.broadcast {
            for token in self.clients.tokens() {
                let listed = self.clients.get(token).is_some_and(|entry| {
                    entry.is_active()
                        && (screens.is_empty()
                            || entry.screen.as_ref().is_some_and(|s| screens.contains(s)))
                });
                if listed && !targets.contains(&token) {
                    targets.push(token);
                }
            }
        }
        for token in targets {
            self.send_to(token, msg);
        }
    }

    fn publish_client_list(&mut self) {
        let local = &self.settings.screen_name;
        let mut screens = vec![local.clone()];
        screens.extend(
            self.settings
                .topology
                .screens()
                .filter(|name| *name != local && self.clients.find_active(name).is_some())
                .cloned(),
        );
        self.status.publish(StatusEvent::ClientListChanged { screens });
    }

    /// Hands every queued frame to the transport and moves each clipboard
    /// transfer forward by one chunk.
    fn pump(&mut self, dispatcher: &mut Dispatcher<ServerEvent>, transport: &mut dyn Transport) {
        let mut more = false;
        for entry in self.clients.iter_mut() {
            entry.session.flush(transport);
            if transport.backlog(entry.token()) == 0 && entry.session.step_clipboard() {
                entry.session.flush(transport);
                more |= !entry.session.is_clipboard_idle();
            }
        }
        if more && !self.pump_posted {
            self.pump_posted = true;
            dispatcher.post_user(ServerEvent::Pump);
        }
    }
}

impl<S: ScreenBackend, St: StatusSink> Handler<ServerEvent> for Server<S, St> {
    fn handle(
        &mut self,
        event: Event<ServerEvent>,
        dispatcher: &mut Dispatcher<ServerEvent>,
        transport: &mut dyn Transport,
    ) {
        match event {
            Event::Net(net) => self.on_net(net, dispatcher, transport),
            Event::Timer(id) => self.on_timer(id, dispatcher),
            Event::User(ServerEvent::Input(input)) => self.on_input(input, dispatcher),
            Event::User(ServerEvent::SessionEnded { token, reason }) => {
                self.end_session(token, &reason, true, dispatcher, transport);
            }
            Event::User(ServerEvent::Pump) => self.pump_posted = false,
            Event::User(ServerEvent::Shutdown) => {
                self.shutdown(dispatcher, transport);
                return;
            }
        }
        self.pump(dispatcher, transport);
    }
}

/// Saturates a coordinate into the 16-bit wire range.
fn to_wire(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
