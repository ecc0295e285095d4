//! End-to-end scenarios for the client orchestrator.
//!
//! The client is driven as the event loop drives it, with an in-memory
//! transport standing in for the server connection, a recording screen and
//! a recording status sink.  Time only moves when a test advances it.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use kvm_client::application::client::{Client, ClientEvent, ClientSettings, EndReason};
use kvm_core::keymap::{KeyId, ModifierMask};
use kvm_core::net::mock::RecordingTransport;
use kvm_core::protocol::codec::{decode_hello_back, LENGTH_PREFIX_SIZE};
use kvm_core::protocol::messages::{
    ChunkMark, ClipboardChunk, ClipboardId, Greeting, KeyEvent, ProtocolName, OPTION_HEARTBEAT,
};
use kvm_core::screen::mock::{RecordingScreen, ScreenCall};
use kvm_core::screen::KeyPhase;
use kvm_core::session::Refusal;
use kvm_core::status::RecordingStatus;
use kvm_core::{
    encode_message, CloseReason, Dispatcher, Event, Handler, Message, NetEvent, ProtocolVersion,
    ScreenShape, SessionError, StatusEvent, Tier, Token,
};

const SERVER: Token = Token(7);
const TIER: Tier = Tier::V1_6;

fn body(msg: &Message, tier: Tier) -> Vec<u8> {
    encode_message(msg, tier).expect("encode")[LENGTH_PREFIX_SIZE..].to_vec()
}

fn server_addr() -> SocketAddr {
    "127.0.0.1:24800".parse().expect("addr")
}

fn key(id: KeyId) -> KeyEvent {
    KeyEvent {
        id,
        mask: ModifierMask::NONE,
        button: 0,
    }
}

fn chunk(mark: ChunkMark, data: &[u8]) -> Message {
    Message::ClipboardData(ClipboardChunk {
        id: ClipboardId::CLIPBOARD,
        seq: 1,
        mark,
        data: data.to_vec(),
    })
}

/// Concatenated payload of the `Data` chunks in `sent`.
fn streamed(sent: &[Message]) -> Vec<u8> {
    sent.iter()
        .filter_map(|m| match m {
            Message::ClipboardData(chunk) if chunk.mark == ChunkMark::Data => {
                Some(chunk.data.clone())
            }
            _ => None,
        })
        .flatten()
        .collect()
}

struct Harness {
    client: Client<RecordingScreen, RecordingStatus>,
    dispatcher: Dispatcher<ClientEvent>,
    transport: RecordingTransport,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(ClientSettings::new("laptop"))
    }

    fn with_settings(settings: ClientSettings) -> Self {
        let now = Instant::now();
        let screen = RecordingScreen::new(ScreenShape::new(0, 0, 1280, 1024));
        let mut client = Client::new(settings, screen, RecordingStatus::new());
        client.begin(SERVER, server_addr());
        Self {
            client,
            dispatcher: Dispatcher::starting_at(now),
            transport: RecordingTransport::new(),
            now,
        }
    }

    fn post(&mut self, event: Event<ClientEvent>) {
        self.dispatcher.post(event);
        self.drain();
    }

    fn drain(&mut self) {
        while !self.dispatcher.is_stopped() {
            let Some(event) = self.dispatcher.next_event(self.now) else {
                break;
            };
            self.client
                .handle(event, &mut self.dispatcher, &mut self.transport);
        }
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        self.drain();
    }

    fn frame(&mut self, msg: &Message, tier: Tier) {
        self.post(Event::Net(NetEvent::Frame {
            token: SERVER,
            body: body(msg, tier),
        }));
    }

    fn user(&mut self, event: ClientEvent) {
        self.post(Event::User(event));
    }

    /// Completes the connect and the server's greeting.
    fn greet(&mut self, version: ProtocolVersion) {
        self.post(Event::Net(NetEvent::Connected(SERVER)));
        let hello = Message::Hello(Greeting {
            protocol: ProtocolName::Synergy,
            version,
        });
        self.frame(&hello, Tier::V1_0);
    }

    /// Greeting, info query and acknowledgement: the session ends up active.
    fn activate(&mut self) {
        self.greet(ProtocolVersion::new(1, 6));
        self.frame(&Message::QueryInfo, TIER);
        self.frame(&Message::InfoAck, TIER);
        self.transport.clear_sent();
    }

    fn sent(&self) -> Vec<Message> {
        self.transport.messages(SERVER, TIER)
    }

    fn screen_calls(&mut self) -> Vec<ScreenCall> {
        self.client.screen_mut().take_calls()
    }

    fn status(&self) -> &[StatusEvent] {
        &self.client.status().events
    }
}

// ── Connecting ────────────────────────────────────────────────────────────────

#[test]
fn test_begin_publishes_connecting() {
    let h = Harness::new();
    assert_eq!(
        h.status(),
        [StatusEvent::Connecting {
            addr: server_addr()
        }]
    );
}

#[test]
fn test_refused_connect_reports_failure_and_stops() {
    // Arrange
    let mut h = Harness::new();

    // Act
    h.post(Event::Net(NetEvent::Closed {
        token: SERVER,
        reason: CloseReason::Reset,
    }));

    // Assert
    assert!(h.dispatcher.is_stopped());
    assert!(h
        .status()
        .iter()
        .any(|e| matches!(e, StatusEvent::ConnectionFailed { .. })));
    assert_eq!(
        h.client.end_reason(),
        Some(&EndReason::Transport(CloseReason::Reset))
    );
}

#[test]
fn test_greeting_is_answered_with_screen_name() {
    // Arrange
    let mut h = Harness::new();

    // Act
    h.greet(ProtocolVersion::new(1, 6));

    // Assert
    let frames = h.transport.frames(SERVER);
    assert_eq!(frames.len(), 1);
    let (greeting, name) = decode_hello_back(&frames[0]).expect("hello back");
    assert_eq!(name, "laptop");
    assert_eq!(greeting.protocol, ProtocolName::Synergy);
    assert!(!h.client.is_active());
}

#[test]
fn test_info_query_is_answered_and_ack_activates() {
    // Arrange
    let mut h = Harness::new();
    h.greet(ProtocolVersion::new(1, 6));

    // Act
    h.frame(&Message::QueryInfo, TIER);
    let replies = h.sent();
    h.frame(&Message::InfoAck, TIER);

    // Assert
    let info = replies
        .iter()
        .find_map(|m| match m {
            Message::Info(info) => Some(*info),
            _ => None,
        })
        .expect("screen info sent");
    assert_eq!((info.width, info.height), (1280, 1024));
    assert_eq!((info.cursor_x, info.cursor_y), (640, 512));
    assert!(h.client.is_active());
    assert!(h.status().contains(&StatusEvent::Connected {
        screen: "laptop".into()
    }));
}

#[test]
fn test_newer_server_version_is_incompatible() {
    // Arrange
    let mut h = Harness::new();

    // Act
    h.greet(ProtocolVersion::new(2, 0));

    // Assert
    assert!(h
        .status()
        .contains(&StatusEvent::Incompatible { major: 2, minor: 0 }));
    assert!(h.dispatcher.is_stopped());
    assert!(h.transport.is_closed(SERVER));
}

#[test]
fn test_unknown_screen_refusal_ends_the_session() {
    // Arrange
    let mut h = Harness::new();
    h.greet(ProtocolVersion::new(1, 6));

    // Act
    h.frame(&Message::Unknown, TIER);

    // Assert
    assert_eq!(
        h.client.end_reason(),
        Some(&EndReason::Session(SessionError::Rejected(
            Refusal::UnknownScreen
        )))
    );
    assert!(h.dispatcher.is_stopped());
    assert!(h
        .status()
        .iter()
        .any(|e| matches!(e, StatusEvent::Disconnected { screen: None, .. })));
}

// ── Input ─────────────────────────────────────────────────────────────────────

#[test]
fn test_forwarded_input_reaches_the_screen() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    h.frame(
        &Message::Enter {
            x: 0,
            y: 300,
            seq: 1,
            mask: ModifierMask::SHIFT,
        },
        TIER,
    );
    h.frame(&Message::MouseMove { x: 10, y: 310 }, TIER);
    h.frame(&Message::KeyDown(key(KeyId::F1)), TIER);
    h.frame(
        &Message::KeyRepeat {
            key: key(KeyId::F1),
            count: 3,
        },
        TIER,
    );
    h.frame(&Message::KeyUp(key(KeyId::F1)), TIER);
    h.frame(&Message::MouseDown(1), TIER);
    h.frame(&Message::MouseUp(1), TIER);
    h.frame(&Message::MouseWheel { dx: 0, dy: 120 }, TIER);
    h.frame(&Message::Leave, TIER);

    // Assert
    assert_eq!(
        h.screen_calls(),
        [
            ScreenCall::Enter {
                x: 0,
                y: 300,
                mask: ModifierMask::SHIFT
            },
            ScreenCall::Motion { x: 10, y: 310 },
            ScreenCall::Key {
                key: key(KeyId::F1),
                phase: KeyPhase::Down
            },
            ScreenCall::Key {
                key: key(KeyId::F1),
                phase: KeyPhase::Repeat(3)
            },
            ScreenCall::Key {
                key: key(KeyId::F1),
                phase: KeyPhase::Up
            },
            ScreenCall::Button {
                button: 1,
                down: true
            },
            ScreenCall::Button {
                button: 1,
                down: false
            },
            ScreenCall::Wheel { dx: 0, dy: 120 },
            ScreenCall::Leave,
        ]
    );
    assert_eq!(h.client.enter_sequence(), 1);
    assert!(!h.client.is_entered());
}

#[test]
fn test_screensaver_is_forwarded() {
    let mut h = Harness::new();
    h.activate();
    h.frame(&Message::ScreenSaver { on: true }, TIER);
    assert_eq!(h.screen_calls(), [ScreenCall::Screensaver(true)]);
}

#[test]
fn test_input_before_activation_is_a_protocol_violation() {
    // Arrange
    let mut h = Harness::new();
    h.greet(ProtocolVersion::new(1, 6));

    // Act
    h.frame(&Message::MouseMove { x: 1, y: 1 }, TIER);

    // Assert
    assert!(h.screen_calls().is_empty());
    assert!(matches!(
        h.client.end_reason(),
        Some(EndReason::Session(SessionError::UnexpectedMessage { .. }))
    ));
}

#[test]
fn test_server_goodbye_releases_an_entered_screen() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    h.frame(
        &Message::Enter {
            x: 5,
            y: 5,
            seq: 1,
            mask: ModifierMask::NONE,
        },
        TIER,
    );
    h.screen_calls();

    // Act
    h.frame(&Message::Close, TIER);

    // Assert
    assert_eq!(h.screen_calls(), [ScreenCall::Leave]);
    assert_eq!(
        h.client.end_reason(),
        Some(&EndReason::Session(SessionError::Closed))
    );
    assert!(h.dispatcher.is_stopped());
}

// ── Keep-alive ────────────────────────────────────────────────────────────────

#[test]
fn test_keep_alive_is_echoed() {
    let mut h = Harness::new();
    h.activate();
    h.frame(&Message::KeepAlive, TIER);
    assert_eq!(h.sent(), [Message::KeepAlive]);
}

#[test]
fn test_silent_server_times_out() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    h.advance(Duration::from_secs(10));

    // Assert
    assert_eq!(
        h.client.end_reason(),
        Some(&EndReason::Session(SessionError::HeartbeatTimeout))
    );
    assert!(h.transport.is_closed(SERVER));
}

#[test]
fn test_talking_server_stays_connected() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    for _ in 0..5 {
        h.advance(Duration::from_secs(3));
        h.frame(&Message::KeepAlive, TIER);
    }

    // Assert
    assert!(h.client.is_active());
    assert!(h.client.end_reason().is_none());
}

#[test]
fn test_heartbeat_option_shortens_the_timeout() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    h.frame(&Message::SetOptions(vec![OPTION_HEARTBEAT, 1000]), TIER);
    h.advance(Duration::from_secs(4));

    // Assert
    assert_eq!(
        h.client.end_reason(),
        Some(&EndReason::Session(SessionError::HeartbeatTimeout))
    );
}

#[test]
fn test_reset_options_restores_the_default_rate() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    h.frame(&Message::SetOptions(vec![OPTION_HEARTBEAT, 1000]), TIER);

    // Act
    h.frame(&Message::ResetOptions, TIER);

    // Assert
    assert_eq!(h.client.heartbeat().interval, Duration::from_secs(3));
    h.advance(Duration::from_secs(4));
    assert!(h.client.end_reason().is_none());
}

// ── Clipboard ─────────────────────────────────────────────────────────────────

#[test]
fn test_grab_while_entered_is_announced_and_sent_on_leave() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    h.frame(
        &Message::Enter {
            x: 0,
            y: 0,
            seq: 1,
            mask: ModifierMask::NONE,
        },
        TIER,
    );
    h.client
        .screen_mut()
        .preset_clipboard(ClipboardId::CLIPBOARD, b"hello");

    // Act
    h.user(ClientEvent::ClipboardGrabbed(ClipboardId::CLIPBOARD));
    let on_grab = h.sent();
    h.transport.clear_sent();
    h.frame(&Message::Leave, TIER);

    // Assert
    assert_eq!(
        on_grab,
        [Message::ClipboardGrab {
            id: ClipboardId::CLIPBOARD,
            seq: 1
        }]
    );
    let on_leave = h.sent();
    assert_eq!(streamed(&on_leave), b"hello");
    assert!(on_leave.iter().any(|m| matches!(
        m,
        Message::ClipboardData(ClipboardChunk {
            mark: ChunkMark::End,
            seq: 1,
            ..
        })
    )));
    assert!(h.client.owns_clipboard(ClipboardId::CLIPBOARD));
}

#[test]
fn test_unchanged_clipboard_is_not_resent() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    let enter = |seq| Message::Enter {
        x: 0,
        y: 0,
        seq,
        mask: ModifierMask::NONE,
    };
    h.frame(&enter(1), TIER);
    h.client
        .screen_mut()
        .preset_clipboard(ClipboardId::CLIPBOARD, b"same");
    h.user(ClientEvent::ClipboardGrabbed(ClipboardId::CLIPBOARD));
    h.frame(&Message::Leave, TIER);
    h.transport.clear_sent();

    // Act
    h.frame(&enter(2), TIER);
    h.frame(&Message::Leave, TIER);

    // Assert
    assert!(h
        .sent()
        .iter()
        .all(|m| !matches!(m, Message::ClipboardData(_))));
}

#[test]
fn test_grab_while_not_entered_is_sent_right_away() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    h.client
        .screen_mut()
        .preset_clipboard(ClipboardId::SELECTION, b"sel");

    // Act
    h.user(ClientEvent::ClipboardGrabbed(ClipboardId::SELECTION));

    // Assert
    let sent = h.sent();
    assert_eq!(
        sent.first(),
        Some(&Message::ClipboardGrab {
            id: ClipboardId::SELECTION,
            seq: 0
        })
    );
    assert_eq!(streamed(&sent), b"sel");
}

#[test]
fn test_server_grab_drops_local_ownership() {
    // Arrange
    let mut h = Harness::new();
    h.activate();
    h.frame(
        &Message::Enter {
            x: 0,
            y: 0,
            seq: 1,
            mask: ModifierMask::NONE,
        },
        TIER,
    );
    h.client
        .screen_mut()
        .preset_clipboard(ClipboardId::CLIPBOARD, b"mine");
    h.user(ClientEvent::ClipboardGrabbed(ClipboardId::CLIPBOARD));
    h.transport.clear_sent();

    // Act
    h.frame(
        &Message::ClipboardGrab {
            id: ClipboardId::CLIPBOARD,
            seq: 1,
        },
        TIER,
    );
    h.frame(&Message::Leave, TIER);

    // Assert
    assert!(!h.client.owns_clipboard(ClipboardId::CLIPBOARD));
    assert!(h
        .sent()
        .iter()
        .all(|m| !matches!(m, Message::ClipboardData(_))));
}

#[test]
fn test_server_clipboard_is_written_to_the_screen() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    h.frame(&chunk(ChunkMark::Start, b"5"), TIER);
    h.frame(&chunk(ChunkMark::Data, b"hello"), TIER);
    h.frame(&chunk(ChunkMark::End, b""), TIER);

    // Assert
    assert_eq!(
        h.screen_calls(),
        [ScreenCall::SetClipboard {
            id: ClipboardId::CLIPBOARD,
            data: b"hello".to_vec()
        }]
    );
}

#[test]
fn test_clipboard_sharing_off_ignores_grabs_and_data() {
    // Arrange
    let mut settings = ClientSettings::new("laptop");
    settings.clipboard_sharing = false;
    let mut h = Harness::with_settings(settings);
    h.activate();
    h.client
        .screen_mut()
        .preset_clipboard(ClipboardId::CLIPBOARD, b"secret");

    // Act
    h.user(ClientEvent::ClipboardGrabbed(ClipboardId::CLIPBOARD));
    h.frame(&chunk(ChunkMark::Start, b"2"), TIER);
    h.frame(&chunk(ChunkMark::Data, b"hi"), TIER);
    h.frame(&chunk(ChunkMark::End, b""), TIER);

    // Assert
    assert!(h.sent().is_empty());
    assert!(h.screen_calls().is_empty());
}

// ── Local events and shutdown ─────────────────────────────────────────────────

#[test]
fn test_unchanged_screen_is_not_reported_again() {
    let mut h = Harness::new();
    h.activate();
    h.user(ClientEvent::ScreenChanged);
    assert!(h.sent().is_empty());
}

#[test]
fn test_shutdown_says_goodbye() {
    // Arrange
    let mut h = Harness::new();
    h.activate();

    // Act
    h.user(ClientEvent::Shutdown);

    // Assert
    assert_eq!(h.sent(), [Message::Close]);
    assert!(h.transport.is_closed(SERVER));
    assert!(h.dispatcher.is_stopped());
    assert_eq!(h.status().last(), Some(&StatusEvent::Stopped));
    assert_eq!(h.client.end_reason(), Some(&EndReason::Shutdown));
}
