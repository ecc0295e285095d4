//! Session wire protocol: message catalog, tiers, codec and clipboard streaming.

pub mod codec;
pub mod messages;
pub mod sequence;
pub mod transfer;
pub mod version;

pub use codec::{
    decode_hello, decode_hello_back, decode_message, encode_message, Decoded, FrameDecoder,
    ProtocolError,
};
pub use messages::{Message, MessageKind, MessageTag};
pub use sequence::EnterSequence;
pub use version::{ProtocolVersion, Tier};
