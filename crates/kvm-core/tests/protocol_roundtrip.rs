//! Integration tests for the wire codec through the public API.
//!
//! Every message kind is encoded, split back out of a byte stream with the
//! frame decoder, and decoded at the same tier.

use std::collections::HashSet;

use kvm_core::{
    decode_message, encode_message,
    keymap::{KeyId, ModifierMask},
    protocol::{
        codec::{decode_hello, decode_hello_back, Decoded, FrameDecoder},
        messages::{
            ChunkMark, ClipboardChunk, ClipboardId, Greeting, KeyEvent, MessageKind,
            ProtocolName, ScreenInfo,
        },
    },
    Message, ProtocolVersion, Tier,
};

fn key(id: u16) -> KeyEvent {
    KeyEvent {
        id: KeyId(id),
        mask: ModifierMask::CONTROL | ModifierMask::SHIFT,
        button: 0x26,
    }
}

/// One message of every kind that tier 1.8 carries after the greeting.
fn catalog() -> Vec<Message> {
    vec![
        Message::NoOp,
        Message::Close,
        Message::Enter {
            x: -20,
            y: 1079,
            seq: 0xDEAD_BEEF,
            mask: ModifierMask::ALT,
        },
        Message::Leave,
        Message::ClipboardGrab {
            id: ClipboardId::SELECTION,
            seq: 7,
        },
        Message::ScreenSaver { on: true },
        Message::ResetOptions,
        Message::InfoAck,
        Message::KeepAlive,
        Message::KeyDown(key(0x61)),
        Message::KeyDownLang {
            key: key(0x00E9),
            lang: "fr".to_string(),
        },
        Message::KeyRepeat {
            key: key(0xEF51),
            count: 3,
        },
        Message::KeyUp(key(0x61)),
        Message::MouseDown(1),
        Message::MouseUp(3),
        Message::MouseMove { x: 960, y: -4 },
        Message::MouseRelMove { dx: -12, dy: 30 },
        Message::MouseWheel { dx: -120, dy: 240 },
        Message::ClipboardData(ClipboardChunk {
            id: ClipboardId::CLIPBOARD,
            seq: 9,
            mark: ChunkMark::Data,
            data: b"\x00binary\xffpayload".to_vec(),
        }),
        Message::Info(ScreenInfo {
            x: 0,
            y: 0,
            width: 2560,
            height: 1440,
            warp_zone: 0,
            cursor_x: 100,
            cursor_y: 200,
        }),
        Message::SetOptions(vec![0x4844_5458, 1, 0x4D44_4C54, 250]),
        Message::SecureInput("1Password".to_string()),
        Message::LanguageSync("enfrde".to_string()),
        Message::QueryInfo,
        Message::Incompatible(ProtocolVersion::new(1, 8)),
        Message::Busy,
        Message::Unknown,
        Message::Bad,
    ]
}

#[test]
fn test_roundtrip_every_message_kind_through_a_stream() {
    // Arrange – all frames back to back in one buffer
    let messages = catalog();
    let mut stream = Vec::new();
    for msg in &messages {
        stream.extend(encode_message(msg, Tier::LATEST).expect("encode must succeed"));
    }

    // Act – feed the stream in small, uneven pieces
    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    for piece in stream.chunks(5) {
        decoder.extend(piece);
        while let Some(body) = decoder.next_frame().expect("frame must be valid") {
            match decode_message(&body, Tier::LATEST).expect("decode must succeed") {
                Decoded::Message(msg) => decoded.push(msg),
                Decoded::Unsupported(tag) => panic!("unexpected unsupported tag {tag}"),
            }
        }
    }

    // Assert
    assert_eq!(decoded, messages);
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_catalog_has_one_message_per_tagged_kind() {
    let kinds: HashSet<MessageKind> = catalog().iter().map(Message::kind).collect();
    assert!(kinds.iter().all(|kind| kind.tag().is_some()));
    // Every kind except the two untagged greetings.
    assert_eq!(kinds.len(), 28);
}

#[test]
fn test_roundtrip_greetings() {
    // Arrange
    let greeting = Greeting {
        protocol: ProtocolName::Barrier,
        version: ProtocolVersion::new(1, 6),
    };
    let hello = encode_message(&Message::Hello(greeting), Tier::V1_0).unwrap();
    let hello_back = encode_message(
        &Message::HelloBack {
            greeting,
            name: "workstation".to_string(),
        },
        Tier::V1_0,
    )
    .unwrap();

    // Act
    let mut decoder = FrameDecoder::new();
    decoder.extend(&hello);
    decoder.extend(&hello_back);
    let first = decoder.next_frame().unwrap().unwrap();
    let second = decoder.next_frame().unwrap().unwrap();

    // Assert
    assert_eq!(decode_hello(&first).unwrap(), greeting);
    assert_eq!(
        decode_hello_back(&second).unwrap(),
        (greeting, "workstation".to_string())
    );
}

#[test]
fn test_lower_tier_drops_fields_it_does_not_carry() {
    // Arrange – tier 1.0 has no key button and no horizontal wheel
    let down = Message::KeyDown(key(0x62));
    let wheel = Message::MouseWheel { dx: 120, dy: -120 };

    // Act
    let decode = |msg: &Message| {
        let frame = encode_message(msg, Tier::V1_0).unwrap();
        match decode_message(&frame[4..], Tier::V1_0).unwrap() {
            Decoded::Message(m) => m,
            Decoded::Unsupported(tag) => panic!("unsupported {tag}"),
        }
    };

    // Assert
    assert_eq!(
        decode(&down),
        Message::KeyDown(KeyEvent {
            button: 0,
            ..key(0x62)
        })
    );
    assert_eq!(decode(&wheel), Message::MouseWheel { dx: 0, dy: -120 });
}

#[test]
fn test_newer_message_is_unsupported_at_older_tier() {
    // Arrange – negotiated (1,4) against (1,6)
    let tier = ProtocolVersion::new(1, 4)
        .negotiate(ProtocolVersion::new(1, 6))
        .unwrap();
    let frame = encode_message(&Message::SecureInput("x".into()), Tier::LATEST).unwrap();

    // Act
    let result = decode_message(&frame[4..], tier);

    // Assert
    assert_eq!(tier, Tier::V1_4);
    assert!(matches!(result, Ok(Decoded::Unsupported(_))));
}
