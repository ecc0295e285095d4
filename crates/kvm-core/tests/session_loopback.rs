//! End-to-end handshake over real loopback sockets.
//!
//! One event loop hosts both ends: a listening server and a connecting
//! client.  The handler below is a minimal orchestrator that creates a
//! session per connection and answers what each session asks for.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kvm_core::{
    net::reactor::{AcceptJob, ConnectJob},
    protocol::messages::{ClipboardId, ScreenInfo},
    protocol::transfer::CompletedClipboard,
    session::Role,
    Dispatcher, Event, EventLoop, Handler, Message, NetEvent, Session, SessionConfig,
    SessionError, SessionEvent, Tier, Token, Transport,
};

const CLIENT_INFO: ScreenInfo = ScreenInfo {
    x: 0,
    y: 0,
    width: 1280,
    height: 800,
    warp_zone: 0,
    cursor_x: 640,
    cursor_y: 400,
};

#[derive(Default)]
struct Harness {
    config: SessionConfig,
    sessions: HashMap<Token, Session>,
    activated: Vec<(Role, Tier)>,
    greeted_name: Option<String>,
    clipboard: Option<CompletedClipboard>,
    /// When set, the client sends this clipboard once active.
    clipboard_to_send: Option<Vec<u8>>,
    expects_clipboard: bool,
    failures: Vec<SessionError>,
    timed_out: bool,
}

impl Harness {
    fn on_session_event(&mut self, token: Token, event: SessionEvent) {
        let Some(session) = self.sessions.get_mut(&token) else {
            return;
        };
        match event {
            SessionEvent::Negotiated { name, .. } if session.role() == Role::Server => {
                self.greeted_name = Some(name);
                session.accept().unwrap();
            }
            SessionEvent::Message(Message::QueryInfo) => {
                session.send(&Message::Info(CLIENT_INFO)).unwrap();
            }
            SessionEvent::Activated(_) => {
                let tier = session.tier().unwrap();
                self.activated.push((session.role(), tier));
                if session.role() == Role::Client {
                    if let Some(data) = self.clipboard_to_send.take() {
                        session
                            .begin_clipboard(ClipboardId::CLIPBOARD, 0, data)
                            .unwrap();
                    }
                }
            }
            SessionEvent::Clipboard(done) => self.clipboard = Some(done),
            _ => {}
        }
    }

    fn done(&self) -> bool {
        self.activated.len() == 2 && (self.clipboard.is_some() || !self.expects_clipboard)
    }
}

impl Handler<()> for Harness {
    fn handle(
        &mut self,
        event: Event<()>,
        dispatcher: &mut Dispatcher<()>,
        transport: &mut dyn Transport,
    ) {
        let token = match event {
            Event::Net(NetEvent::Accepted { token, .. }) => {
                let session = Session::server(token, self.config.clone(), Instant::now());
                self.sessions.insert(token, session);
                token
            }
            Event::Net(NetEvent::Connected(token)) => {
                let session =
                    Session::client(token, self.config.clone(), "laptop", Instant::now());
                self.sessions.insert(token, session);
                token
            }
            Event::Net(NetEvent::Frame { token, body }) => {
                let Some(session) = self.sessions.get_mut(&token) else {
                    return;
                };
                match session.handle_frame(&body, Instant::now()) {
                    Ok(event) => self.on_session_event(token, event),
                    Err(e) => self.failures.push(e),
                }
                token
            }
            Event::Net(NetEvent::Drained(token)) => token,
            Event::Net(other) => panic!("unexpected net event {other:?}"),
            Event::Timer(_) => {
                self.timed_out = true;
                dispatcher.stop();
                return;
            }
            Event::User(()) => return,
        };

        // One clipboard chunk per step until the socket backs up; the
        // `Drained` event resumes the transfer.
        if let Some(session) = self.sessions.get_mut(&token) {
            loop {
                session.flush(transport);
                if transport.backlog(token) > 0 || !session.step_clipboard() {
                    break;
                }
            }
        }
        if self.done() || !self.failures.is_empty() {
            dispatcher.stop();
        }
    }
}

fn run(harness: &mut Harness) {
    let mut event_loop = EventLoop::<()>::new().unwrap();
    let listener = event_loop
        .reactor
        .listen("127.0.0.1:0".parse().unwrap(), Box::new(AcceptJob))
        .unwrap();
    let addr = event_loop.reactor.local_addr(listener).unwrap();
    event_loop
        .reactor
        .connect(addr, Box::new(ConnectJob))
        .unwrap();
    event_loop
        .dispatcher
        .adopt_timer(Duration::from_secs(10), false);

    event_loop.run(harness).unwrap();
}

#[test]
fn test_server_and_client_reach_active_at_latest_tier() {
    // Arrange
    let mut harness = Harness::default();

    // Act
    run(&mut harness);

    // Assert
    assert!(!harness.timed_out, "handshake did not finish");
    assert!(harness.failures.is_empty(), "{:?}", harness.failures);
    assert_eq!(harness.greeted_name.as_deref(), Some("laptop"));
    assert!(harness.activated.contains(&(Role::Server, Tier::LATEST)));
    assert!(harness.activated.contains(&(Role::Client, Tier::LATEST)));
}

#[test]
fn test_large_clipboard_streams_in_chunks_over_the_wire() {
    // Arrange – larger than several chunks
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let mut harness = Harness {
        clipboard_to_send: Some(payload.clone()),
        expects_clipboard: true,
        ..Harness::default()
    };

    // Act
    run(&mut harness);

    // Assert
    assert!(!harness.timed_out, "transfer did not finish");
    assert!(harness.failures.is_empty(), "{:?}", harness.failures);
    let received = harness.clipboard.expect("clipboard must arrive");
    assert_eq!(received.id, ClipboardId::CLIPBOARD);
    assert_eq!(received.data, payload);
}
