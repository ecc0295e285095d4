//! In-memory [`Transport`] for orchestrator tests.
//!
//! Records every frame sent per token and every close, and lets a test
//! pretend a socket is backed up by setting its backlog.

use std::collections::HashMap;

use crate::net::{Token, Transport};
use crate::protocol::codec::{decode_message, Decoded, FrameDecoder};
use crate::protocol::messages::Message;
use crate::protocol::version::Tier;

/// A transport that stores outgoing bytes instead of writing them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: HashMap<Token, Vec<u8>>,
    closed: Vec<Token>,
    backlog: HashMap<Token, usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes sent to `token` so far.
    pub fn bytes_sent(&self, token: Token) -> &[u8] {
        self.sent.get(&token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Frame bodies sent to `token`, in order.
    pub fn frames(&self, token: Token) -> Vec<Vec<u8>> {
        let mut decoder = FrameDecoder::new();
        decoder.extend(self.bytes_sent(token));
        std::iter::from_fn(|| decoder.next_frame().ok().flatten()).collect()
    }

    /// Tagged messages sent to `token`, decoded at `tier`.  Greetings and
    /// frames that do not decode are skipped.
    pub fn messages(&self, token: Token, tier: Tier) -> Vec<Message> {
        self.frames(token)
            .iter()
            .filter_map(|body| match decode_message(body, tier) {
                Ok(Decoded::Message(msg)) => Some(msg),
                _ => None,
            })
            .collect()
    }

    /// Forgets everything sent so far, keeping closes and backlogs.
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub fn closed(&self) -> &[Token] {
        &self.closed
    }

    pub fn is_closed(&self, token: Token) -> bool {
        self.closed.contains(&token)
    }

    /// Makes [`Transport::backlog`] report `bytes` for `token`.
    pub fn set_backlog(&mut self, token: Token, bytes: usize) {
        self.backlog.insert(token, bytes);
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, token: Token, bytes: &[u8]) {
        self.sent.entry(token).or_default().extend_from_slice(bytes);
    }

    fn close(&mut self, token: Token) {
        if !self.closed.contains(&token) {
            self.closed.push(token);
        }
    }

    fn backlog(&self, token: Token) -> usize {
        self.backlog.get(&token).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_message;

    #[test]
    fn test_records_frames_per_token() {
        // Arrange
        let mut transport = RecordingTransport::new();
        let leave = encode_message(&Message::Leave, Tier::V1_6).unwrap();
        let noop = encode_message(&Message::NoOp, Tier::V1_6).unwrap();

        // Act
        transport.send(Token(1), &leave);
        transport.send(Token(2), &noop);
        transport.send(Token(1), &noop);

        // Assert
        assert_eq!(
            transport.messages(Token(1), Tier::V1_6),
            [Message::Leave, Message::NoOp]
        );
        assert_eq!(transport.messages(Token(2), Tier::V1_6), [Message::NoOp]);
        assert!(transport.messages(Token(3), Tier::V1_6).is_empty());
    }

    #[test]
    fn test_close_is_recorded_once() {
        let mut transport = RecordingTransport::new();
        transport.close(Token(5));
        transport.close(Token(5));
        assert_eq!(transport.closed(), [Token(5)]);
    }
}
