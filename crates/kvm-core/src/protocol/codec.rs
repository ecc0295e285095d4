//! Binary codec for the session protocol.
//!
//! Wire format of one frame:
//! ```text
//! [body_len:4][body:body_len]
//! body = [tag:4][fields...]          (tagged messages)
//! body = [name:7][major:2][minor:2]  (greeting, plus [name_len:4][name] in the reply)
//! ```
//! All integers are big-endian.  Strings and byte blobs are a `u32` length
//! followed by the bytes; integer lists are a `u32` count followed by the items.
//!
//! Some message forms depend on the negotiated [`Tier`], so both directions
//! take the tier as a parameter:
//!
//! - key messages carry the physical `button` only from tier 1.1,
//! - the wheel carries a horizontal delta only from tier 1.3,
//! - clipboard data carries a chunk mark only from tier 1.6.
//!
//! Decoding never reads past the body it was handed, and every failure is a
//! returned [`ProtocolError`]: the codec never panics and never touches a socket.

use thiserror::Error;

use crate::keymap::{KeyId, ModifierMask};
use crate::protocol::messages::{
    ChunkMark, ClipboardChunk, ClipboardId, Greeting, KeyEvent, Message, MessageKind, MessageTag,
    ProtocolName, ScreenInfo,
};
use crate::protocol::version::{ProtocolVersion, Tier};

/// Size of the frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame body accepted from a peer.
pub const MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

/// Largest greeting body accepted during the handshake.
pub const MAX_GREETING_LENGTH: usize = 1024;

/// Largest string field accepted (screen names, language lists, ...).
pub const MAX_STRING_LENGTH: usize = 1024 * 1024;

const TAG_SIZE: usize = 4;

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field extends past the end of the body.
    #[error("truncated message: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// A frame declares a body larger than the configured maximum.
    #[error("frame of {declared} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { declared: usize, max: usize },

    /// The body parsed but a field value is invalid, or bytes are left over.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The caller tried to send a message the negotiated tier does not carry.
    #[error("{tag} is not available at protocol {tier}")]
    UnsupportedAtTier { tag: MessageTag, tier: Tier },

    /// The greeting is not a valid `Hello` / `HelloBack`.
    #[error("bad greeting: {0}")]
    BadGreeting(String),
}

/// Result of decoding one tagged body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    /// The tag is unknown, or belongs to a tier above the negotiated one.
    /// The frame is skipped; the session stays up.
    Unsupported(MessageTag),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `msg` into a complete frame (length prefix included).
///
/// # Errors
///
/// - [`ProtocolError::UnsupportedAtTier`] if `tier` does not carry the message,
/// - [`ProtocolError::MalformedPayload`] if the clipboard chunk mark does not
///   match the tier or a string is too long,
/// - [`ProtocolError::FrameTooLarge`] if the body exceeds [`MAX_MESSAGE_LENGTH`].
///
/// # Examples
///
/// ```rust
/// use kvm_core::protocol::codec::{decode_message, encode_message, Decoded, LENGTH_PREFIX_SIZE};
/// use kvm_core::protocol::messages::Message;
/// use kvm_core::protocol::version::Tier;
///
/// let msg = Message::MouseMove { x: 10, y: -4 };
/// let frame = encode_message(&msg, Tier::LATEST).unwrap();
/// let decoded = decode_message(&frame[LENGTH_PREFIX_SIZE..], Tier::LATEST).unwrap();
/// assert_eq!(decoded, Decoded::Message(msg));
/// ```
pub fn encode_message(msg: &Message, tier: Tier) -> Result<Vec<u8>, ProtocolError> {
    let kind = msg.kind();
    if let Some(tag) = kind.tag() {
        if !tier.supports(kind) {
            return Err(ProtocolError::UnsupportedAtTier { tag, tier });
        }
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + 32);
    buf.extend_from_slice(&[0; LENGTH_PREFIX_SIZE]);
    if let Some(tag) = kind.tag() {
        buf.extend_from_slice(&tag.0);
    }
    encode_body(&mut buf, msg, tier)?;

    let body_len = buf.len() - LENGTH_PREFIX_SIZE;
    if body_len > MAX_MESSAGE_LENGTH {
        return Err(ProtocolError::FrameTooLarge {
            declared: body_len,
            max: MAX_MESSAGE_LENGTH,
        });
    }
    // Cannot truncate: body_len <= MAX_MESSAGE_LENGTH.
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(body_len as u32).to_be_bytes());
    Ok(buf)
}

/// Decodes one tagged frame body (without the length prefix).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the body is truncated, carries an invalid
/// field value, or has trailing bytes after the last field.
pub fn decode_message(body: &[u8], tier: Tier) -> Result<Decoded, ProtocolError> {
    if body.len() < TAG_SIZE {
        return Err(ProtocolError::Truncated {
            needed: TAG_SIZE,
            available: body.len(),
        });
    }
    let tag = MessageTag([body[0], body[1], body[2], body[3]]);
    let kind = match MessageKind::from_tag(tag) {
        Some(kind) if tier.supports(kind) => kind,
        _ => return Ok(Decoded::Unsupported(tag)),
    };

    let mut r = FieldReader::new(&body[TAG_SIZE..]);
    let msg = decode_body(kind, &mut r, tier)?;
    r.finish(tag)?;
    Ok(Decoded::Message(msg))
}

/// Decodes the server greeting (`Hello`) body.
///
/// # Errors
///
/// Returns [`ProtocolError::BadGreeting`] if the body is oversized, names an
/// unknown protocol, or is not exactly name + version.
pub fn decode_hello(body: &[u8]) -> Result<Greeting, ProtocolError> {
    let mut r = greeting_reader(body)?;
    let greeting = read_greeting(&mut r)?;
    r.finish_greeting()?;
    Ok(greeting)
}

/// Decodes the client greeting reply (`HelloBack`) body.
///
/// # Errors
///
/// Returns [`ProtocolError::BadGreeting`] on the same conditions as
/// [`decode_hello`], or when the screen name is missing or not UTF-8.
pub fn decode_hello_back(body: &[u8]) -> Result<(Greeting, String), ProtocolError> {
    let mut r = greeting_reader(body)?;
    let greeting = read_greeting(&mut r)?;
    let name = r
        .string(MAX_GREETING_LENGTH)
        .map_err(|e| ProtocolError::BadGreeting(format!("screen name: {e}")))?;
    r.finish_greeting()?;
    Ok((greeting, name))
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Reassembles frame bodies from a byte stream.
///
/// TCP delivers a stream, not messages: one read may contain half a frame or
/// several frames at once.  Feed every read into [`extend`](Self::extend),
/// then call [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_LENGTH)
    }

    /// Creates a decoder that rejects bodies longer than `max_len`.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Appends bytes read from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete body, or `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] as soon as a length prefix
    /// exceeds the limit, without waiting for the body.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let declared =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared > self.max_len {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                max: self.max_len,
            });
        }
        let total = LENGTH_PREFIX_SIZE + declared;
        if self.buf.len() < total {
            return Ok(None);
        }
        let body = self.buf[LENGTH_PREFIX_SIZE..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(body))
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Body encoding ─────────────────────────────────────────────────────────────

fn encode_body(buf: &mut Vec<u8>, msg: &Message, tier: Tier) -> Result<(), ProtocolError> {
    let caps = tier.capabilities();
    match msg {
        Message::Hello(greeting) => write_greeting(buf, greeting),
        Message::HelloBack { greeting, name } => {
            write_greeting(buf, greeting);
            write_string(buf, name, MAX_GREETING_LENGTH)?;
        }
        Message::NoOp
        | Message::Close
        | Message::Leave
        | Message::ResetOptions
        | Message::InfoAck
        | Message::KeepAlive
        | Message::QueryInfo
        | Message::Busy
        | Message::Unknown
        | Message::Bad => {}
        Message::Enter { x, y, seq, mask } => {
            write_i16(buf, *x);
            write_i16(buf, *y);
            write_u32(buf, *seq);
            write_u16(buf, mask.0);
        }
        Message::ClipboardGrab { id, seq } => {
            buf.push(id.0);
            write_u32(buf, *seq);
        }
        Message::ScreenSaver { on } => buf.push(u8::from(*on)),
        Message::KeyDown(key) | Message::KeyUp(key) => {
            write_u16(buf, key.id.0);
            write_u16(buf, key.mask.0);
            if caps.key_button {
                write_u16(buf, key.button);
            }
        }
        Message::KeyRepeat { key, count } => {
            write_u16(buf, key.id.0);
            write_u16(buf, key.mask.0);
            write_u16(buf, *count);
            if caps.key_button {
                write_u16(buf, key.button);
            }
        }
        Message::KeyDownLang { key, lang } => {
            write_u16(buf, key.id.0);
            write_u16(buf, key.mask.0);
            write_u16(buf, key.button);
            write_string(buf, lang, MAX_STRING_LENGTH)?;
        }
        Message::MouseDown(button) | Message::MouseUp(button) => buf.push(*button),
        Message::MouseMove { x, y } => {
            write_i16(buf, *x);
            write_i16(buf, *y);
        }
        Message::MouseRelMove { dx, dy } => {
            write_i16(buf, *dx);
            write_i16(buf, *dy);
        }
        Message::MouseWheel { dx, dy } => {
            if caps.horizontal_wheel {
                write_i16(buf, *dx);
            }
            write_i16(buf, *dy);
        }
        Message::ClipboardData(chunk) => {
            buf.push(chunk.id.0);
            write_u32(buf, chunk.seq);
            match (caps.clipboard_chunking, chunk.mark.wire_value()) {
                (true, Some(mark)) => buf.push(mark),
                (false, None) => {}
                (true, None) => {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "protocol {tier} sends clipboard data in chunks"
                    )))
                }
                (false, Some(_)) => {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "protocol {tier} has no clipboard chunk marks"
                    )))
                }
            }
            write_bytes(buf, &chunk.data);
        }
        Message::Info(info) => {
            for v in [
                info.x,
                info.y,
                info.width,
                info.height,
                info.warp_zone,
                info.cursor_x,
                info.cursor_y,
            ] {
                write_i16(buf, v);
            }
        }
        Message::SetOptions(options) => {
            let count = u32::try_from(options.len())
                .map_err(|_| ProtocolError::MalformedPayload("too many options".to_string()))?;
            write_u32(buf, count);
            for v in options {
                write_u32(buf, *v);
            }
        }
        Message::SecureInput(text) | Message::LanguageSync(text) => {
            write_string(buf, text, MAX_STRING_LENGTH)?;
        }
        Message::Incompatible(version) => {
            write_i16(buf, version.major);
            write_i16(buf, version.minor);
        }
    }
    Ok(())
}

fn write_greeting(buf: &mut Vec<u8>, greeting: &Greeting) {
    buf.extend_from_slice(greeting.protocol.as_bytes());
    write_i16(buf, greeting.version.major);
    write_i16(buf, greeting.version.minor);
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_i16(buf: &mut Vec<u8>, v: i16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    // Frames above u32::MAX are rejected by the caller's size check first.
    write_u32(buf, u32::try_from(bytes.len()).unwrap_or(u32::MAX));
    buf.extend_from_slice(bytes);
}

fn write_string(buf: &mut Vec<u8>, s: &str, max: usize) -> Result<(), ProtocolError> {
    if s.len() > max {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of {} bytes exceeds the {max}-byte limit",
            s.len()
        )));
    }
    write_bytes(buf, s.as_bytes());
    Ok(())
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_body(
    kind: MessageKind,
    r: &mut FieldReader<'_>,
    tier: Tier,
) -> Result<Message, ProtocolError> {
    let caps = tier.capabilities();
    let msg = match kind {
        // Greetings are untagged and handled by decode_hello / decode_hello_back.
        MessageKind::Hello | MessageKind::HelloBack => {
            return Err(ProtocolError::MalformedPayload(
                "greeting outside the handshake".to_string(),
            ))
        }
        MessageKind::NoOp => Message::NoOp,
        MessageKind::Close => Message::Close,
        MessageKind::Leave => Message::Leave,
        MessageKind::ResetOptions => Message::ResetOptions,
        MessageKind::InfoAck => Message::InfoAck,
        MessageKind::KeepAlive => Message::KeepAlive,
        MessageKind::QueryInfo => Message::QueryInfo,
        MessageKind::Busy => Message::Busy,
        MessageKind::Unknown => Message::Unknown,
        MessageKind::Bad => Message::Bad,
        MessageKind::Enter => Message::Enter {
            x: r.i16()?,
            y: r.i16()?,
            seq: r.u32()?,
            mask: ModifierMask(r.u16()?),
        },
        MessageKind::ClipboardGrab => Message::ClipboardGrab {
            id: ClipboardId(r.u8()?),
            seq: r.u32()?,
        },
        MessageKind::ScreenSaver => Message::ScreenSaver { on: r.u8()? != 0 },
        MessageKind::KeyDown => Message::KeyDown(read_key(r, caps.key_button)?),
        MessageKind::KeyUp => Message::KeyUp(read_key(r, caps.key_button)?),
        MessageKind::KeyRepeat => {
            let id = KeyId(r.u16()?);
            let mask = ModifierMask(r.u16()?);
            let count = r.u16()?;
            let button = if caps.key_button { r.u16()? } else { 0 };
            Message::KeyRepeat {
                key: KeyEvent { id, mask, button },
                count,
            }
        }
        MessageKind::KeyDownLang => Message::KeyDownLang {
            key: read_key(r, true)?,
            lang: r.string(MAX_STRING_LENGTH)?,
        },
        MessageKind::MouseDown => Message::MouseDown(r.u8()?),
        MessageKind::MouseUp => Message::MouseUp(r.u8()?),
        MessageKind::MouseMove => Message::MouseMove {
            x: r.i16()?,
            y: r.i16()?,
        },
        MessageKind::MouseRelMove => Message::MouseRelMove {
            dx: r.i16()?,
            dy: r.i16()?,
        },
        MessageKind::MouseWheel => {
            let dx = if caps.horizontal_wheel { r.i16()? } else { 0 };
            Message::MouseWheel { dx, dy: r.i16()? }
        }
        MessageKind::ClipboardData => {
            let id = ClipboardId(r.u8()?);
            let seq = r.u32()?;
            let mark = if caps.clipboard_chunking {
                let raw = r.u8()?;
                ChunkMark::from_wire(raw).ok_or_else(|| {
                    ProtocolError::MalformedPayload(format!("invalid chunk mark {raw}"))
                })?
            } else {
                ChunkMark::Whole
            };
            let data = r.bytes(MAX_MESSAGE_LENGTH)?.to_vec();
            Message::ClipboardData(ClipboardChunk {
                id,
                seq,
                mark,
                data,
            })
        }
        MessageKind::Info => Message::Info(ScreenInfo {
            x: r.i16()?,
            y: r.i16()?,
            width: r.i16()?,
            height: r.i16()?,
            warp_zone: r.i16()?,
            cursor_x: r.i16()?,
            cursor_y: r.i16()?,
        }),
        MessageKind::SetOptions => {
            let count = r.u32()? as usize;
            // Each item is four bytes; reject counts the body cannot hold
            // before allocating.
            r.require(count.saturating_mul(4))?;
            let mut options = Vec::with_capacity(count);
            for _ in 0..count {
                options.push(r.u32()?);
            }
            Message::SetOptions(options)
        }
        MessageKind::SecureInput => Message::SecureInput(r.string(MAX_STRING_LENGTH)?),
        MessageKind::LanguageSync => Message::LanguageSync(r.string(MAX_STRING_LENGTH)?),
        MessageKind::Incompatible => Message::Incompatible(ProtocolVersion {
            major: r.i16()?,
            minor: r.i16()?,
        }),
    };
    Ok(msg)
}

fn read_key(r: &mut FieldReader<'_>, with_button: bool) -> Result<KeyEvent, ProtocolError> {
    let id = KeyId(r.u16()?);
    let mask = ModifierMask(r.u16()?);
    let button = if with_button { r.u16()? } else { 0 };
    Ok(KeyEvent { id, mask, button })
}

fn greeting_reader(body: &[u8]) -> Result<FieldReader<'_>, ProtocolError> {
    if body.len() > MAX_GREETING_LENGTH {
        return Err(ProtocolError::BadGreeting(format!(
            "{} bytes exceeds the {MAX_GREETING_LENGTH}-byte limit",
            body.len()
        )));
    }
    Ok(FieldReader::new(body))
}

fn read_greeting(r: &mut FieldReader<'_>) -> Result<Greeting, ProtocolError> {
    let bad = |e: ProtocolError| ProtocolError::BadGreeting(e.to_string());
    let name = r.take(ProtocolName::LEN).map_err(bad)?;
    let protocol = ProtocolName::from_bytes(name).ok_or_else(|| {
        ProtocolError::BadGreeting(format!(
            "unknown protocol name {:?}",
            String::from_utf8_lossy(name)
        ))
    })?;
    let major = r.i16().map_err(bad)?;
    let minor = r.i16().map_err(bad)?;
    Ok(Greeting {
        protocol,
        version: ProtocolVersion { major, minor },
    })
}

// ── Field reader ──────────────────────────────────────────────────────────────

/// Bounded cursor over a body.  Every read checks the remaining length.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn require(&self, n: usize) -> Result<(), ProtocolError> {
        if self.remaining() < n {
            Err(ProtocolError::Truncated {
                needed: self.pos.saturating_add(n),
                available: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self, max: usize) -> Result<&'a [u8], ProtocolError> {
        let len = self.u32()? as usize;
        if len > max {
            return Err(ProtocolError::MalformedPayload(format!(
                "field of {len} bytes exceeds the {max}-byte limit"
            )));
        }
        self.take(len)
    }

    fn string(&mut self, max: usize) -> Result<String, ProtocolError> {
        let bytes = self.bytes(max)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))
    }

    fn finish(&self, tag: MessageTag) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::MalformedPayload(format!(
                "{n} trailing bytes after {tag}"
            ))),
        }
    }

    fn finish_greeting(&self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::BadGreeting(format!("{n} trailing bytes"))),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
