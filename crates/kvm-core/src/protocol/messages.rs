//! All session protocol message types.
//!
//! Every message after the greeting starts with a four-character ASCII tag
//! (`"DMMV"`, `"CINN"`, ...).  The first letter groups messages by purpose:
//!
//! | Prefix | Meaning                                   |
//! |--------|-------------------------------------------|
//! | `C`    | command (enter, leave, keep-alive, ...)   |
//! | `D`    | data (input events, clipboard, info)      |
//! | `Q`    | query                                     |
//! | `E`    | error, always followed by a disconnect    |
//!
//! The greeting (`Hello` / `HelloBack`) has no tag: it starts with the 7-byte
//! protocol name instead.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::keymap::{ButtonId, KeyId, ModifierMask};
use crate::protocol::version::ProtocolVersion;

// ── Tags ──────────────────────────────────────────────────────────────────────

/// A four-byte ASCII message tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag(pub [u8; 4]);

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageTag({self})")
    }
}

/// Discriminant of [`Message`], used for tier lookups and state checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    HelloBack,
    NoOp,
    Close,
    Enter,
    Leave,
    ClipboardGrab,
    ScreenSaver,
    ResetOptions,
    InfoAck,
    KeepAlive,
    KeyDown,
    KeyDownLang,
    KeyRepeat,
    KeyUp,
    MouseDown,
    MouseUp,
    MouseMove,
    MouseRelMove,
    MouseWheel,
    ClipboardData,
    Info,
    SetOptions,
    SecureInput,
    LanguageSync,
    QueryInfo,
    Incompatible,
    Busy,
    Unknown,
    Bad,
}

const TAG_TABLE: &[(MessageKind, &[u8; 4])] = &[
    (MessageKind::NoOp, b"CNOP"),
    (MessageKind::Close, b"CBYE"),
    (MessageKind::Enter, b"CINN"),
    (MessageKind::Leave, b"COUT"),
    (MessageKind::ClipboardGrab, b"CCLP"),
    (MessageKind::ScreenSaver, b"CSEC"),
    (MessageKind::ResetOptions, b"CROP"),
    (MessageKind::InfoAck, b"CIAK"),
    (MessageKind::KeepAlive, b"CALV"),
    (MessageKind::KeyDown, b"DKDN"),
    (MessageKind::KeyDownLang, b"DKDL"),
    (MessageKind::KeyRepeat, b"DKRP"),
    (MessageKind::KeyUp, b"DKUP"),
    (MessageKind::MouseDown, b"DMDN"),
    (MessageKind::MouseUp, b"DMUP"),
    (MessageKind::MouseMove, b"DMMV"),
    (MessageKind::MouseRelMove, b"DMRM"),
    (MessageKind::MouseWheel, b"DMWM"),
    (MessageKind::ClipboardData, b"DCLP"),
    (MessageKind::Info, b"DINF"),
    (MessageKind::SetOptions, b"DSOP"),
    (MessageKind::SecureInput, b"SECN"),
    (MessageKind::LanguageSync, b"LSYN"),
    (MessageKind::QueryInfo, b"QINF"),
    (MessageKind::Incompatible, b"EICV"),
    (MessageKind::Busy, b"EBSY"),
    (MessageKind::Unknown, b"EUNK"),
    (MessageKind::Bad, b"EBAD"),
];

impl MessageKind {
    /// Returns the wire tag, or `None` for the untagged greeting messages.
    pub fn tag(self) -> Option<MessageTag> {
        TAG_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, tag)| MessageTag(**tag))
    }

    /// Looks up the kind for a wire tag.
    pub fn from_tag(tag: MessageTag) -> Option<MessageKind> {
        TAG_TABLE
            .iter()
            .find(|(_, candidate)| **candidate == tag.0)
            .map(|(kind, _)| *kind)
    }

    /// Returns `true` for the `E***` messages that precede a disconnect.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            MessageKind::Incompatible | MessageKind::Busy | MessageKind::Unknown | MessageKind::Bad
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Some(tag) => write!(f, "{tag}"),
            None => write!(f, "{self:?}"),
        }
    }
}

// ── Greeting ──────────────────────────────────────────────────────────────────

/// Protocol name sent at the start of the greeting.
///
/// Both names speak the same protocol; a server only accepts peers that
/// greet with the name it was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolName {
    #[default]
    Synergy,
    Barrier,
}

impl ProtocolName {
    /// Size of the name on the wire.
    pub const LEN: usize = 7;

    pub fn as_bytes(self) -> &'static [u8; Self::LEN] {
        match self {
            ProtocolName::Synergy => b"Synergy",
            ProtocolName::Barrier => b"Barrier",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<ProtocolName> {
        [ProtocolName::Synergy, ProtocolName::Barrier]
            .into_iter()
            .find(|name| name.as_bytes().as_slice() == bytes)
    }
}

impl fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolName::Synergy => "Synergy",
            ProtocolName::Barrier => "Barrier",
        })
    }
}

/// Protocol name and version exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    pub protocol: ProtocolName,
    pub version: ProtocolVersion,
}

// ── Payload types ─────────────────────────────────────────────────────────────

/// Clipboard selector.  Screens expose two clipboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipboardId(pub u8);

impl ClipboardId {
    /// The regular copy/paste clipboard.
    pub const CLIPBOARD: ClipboardId = ClipboardId(0);
    /// The X11 primary selection.
    pub const SELECTION: ClipboardId = ClipboardId(1);
    /// All clipboards, in id order.
    pub const ALL: [ClipboardId; 2] = [ClipboardId::CLIPBOARD, ClipboardId::SELECTION];

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for ClipboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clipboard {}", self.0)
    }
}

/// Key press/release payload shared by the key messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub id: KeyId,
    pub mask: ModifierMask,
    /// Physical key code on the sending side.  Always 0 on tier 1.0.
    pub button: u16,
}

/// Position of a chunk inside a clipboard transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMark {
    /// Whole payload in one message, used below tier 1.6 (no mark on the wire).
    Whole,
    /// Opens a transfer; the data is the decimal total size.
    Start,
    /// A slice of the payload.
    Data,
    /// Closes a transfer; the data is empty.
    End,
}

impl ChunkMark {
    /// Wire value for chunked tiers.
    pub fn wire_value(self) -> Option<u8> {
        match self {
            ChunkMark::Whole => None,
            ChunkMark::Start => Some(1),
            ChunkMark::Data => Some(2),
            ChunkMark::End => Some(3),
        }
    }

    pub fn from_wire(value: u8) -> Option<ChunkMark> {
        match value {
            1 => Some(ChunkMark::Start),
            2 => Some(ChunkMark::Data),
            3 => Some(ChunkMark::End),
            _ => None,
        }
    }
}

/// `DCLP` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardChunk {
    pub id: ClipboardId,
    /// Enter sequence number the data belongs to.
    pub seq: u32,
    pub mark: ChunkMark,
    pub data: Vec<u8>,
}

/// `DINF` payload: the shape of a screen and its cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenInfo {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    /// Jump-zone size in pixels.  Obsolete on the wire, kept for compatibility.
    pub warp_zone: i16,
    pub cursor_x: i16,
    pub cursor_y: i16,
}

/// `DSOP` option id carrying the keep-alive interval in milliseconds.
pub const OPTION_HEARTBEAT: u32 = u32::from_be_bytes(*b"HART");

// ── Messages ──────────────────────────────────────────────────────────────────

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Server greeting.
    Hello(Greeting),
    /// Client reply to the greeting, carrying the client's screen name.
    HelloBack { greeting: Greeting, name: String },
    NoOp,
    /// Orderly disconnect.
    Close,
    /// Cursor enters the receiving screen at `(x, y)`.
    Enter {
        x: i16,
        y: i16,
        seq: u32,
        mask: ModifierMask,
    },
    /// Cursor leaves the receiving screen.
    Leave,
    /// The sender now owns the clipboard.
    ClipboardGrab { id: ClipboardId, seq: u32 },
    ScreenSaver { on: bool },
    ResetOptions,
    InfoAck,
    KeepAlive,
    KeyDown(KeyEvent),
    KeyDownLang { key: KeyEvent, lang: String },
    KeyRepeat { key: KeyEvent, count: u16 },
    KeyUp(KeyEvent),
    MouseDown(ButtonId),
    MouseUp(ButtonId),
    MouseMove { x: i16, y: i16 },
    MouseRelMove { dx: i16, dy: i16 },
    /// Wheel motion; `dx` is always 0 below tier 1.3.
    MouseWheel { dx: i16, dy: i16 },
    ClipboardData(ClipboardChunk),
    Info(ScreenInfo),
    /// Option id / value pairs.
    SetOptions(Vec<u32>),
    SecureInput(String),
    LanguageSync(String),
    QueryInfo,
    /// The peer's version cannot be served; carries the sender's version.
    Incompatible(ProtocolVersion),
    /// A screen with the same name is already connected.
    Busy,
    /// The screen name is not part of the server's topology.
    Unknown,
    /// Protocol violation.
    Bad,
}

impl Message {
    /// Returns the discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello(_) => MessageKind::Hello,
            Message::HelloBack { .. } => MessageKind::HelloBack,
            Message::NoOp => MessageKind::NoOp,
            Message::Close => MessageKind::Close,
            Message::Enter { .. } => MessageKind::Enter,
            Message::Leave => MessageKind::Leave,
            Message::ClipboardGrab { .. } => MessageKind::ClipboardGrab,
            Message::ScreenSaver { .. } => MessageKind::ScreenSaver,
            Message::ResetOptions => MessageKind::ResetOptions,
            Message::InfoAck => MessageKind::InfoAck,
            Message::KeepAlive => MessageKind::KeepAlive,
            Message::KeyDown(_) => MessageKind::KeyDown,
            Message::KeyDownLang { .. } => MessageKind::KeyDownLang,
            Message::KeyRepeat { .. } => MessageKind::KeyRepeat,
            Message::KeyUp(_) => MessageKind::KeyUp,
            Message::MouseDown(_) => MessageKind::MouseDown,
            Message::MouseUp(_) => MessageKind::MouseUp,
            Message::MouseMove { .. } => MessageKind::MouseMove,
            Message::MouseRelMove { .. } => MessageKind::MouseRelMove,
            Message::MouseWheel { .. } => MessageKind::MouseWheel,
            Message::ClipboardData(_) => MessageKind::ClipboardData,
            Message::Info(_) => MessageKind::Info,
            Message::SetOptions(_) => MessageKind::SetOptions,
            Message::SecureInput(_) => MessageKind::SecureInput,
            Message::LanguageSync(_) => MessageKind::LanguageSync,
            Message::QueryInfo => MessageKind::QueryInfo,
            Message::Incompatible(_) => MessageKind::Incompatible,
            Message::Busy => MessageKind::Busy,
            Message::Unknown => MessageKind::Unknown,
            Message::Bad => MessageKind::Bad,
        }
    }
}
