//! Chunked clipboard transfer.
//!
//! # How a clipboard travels (for beginners)
//!
//! A clipboard can hold megabytes (a copied image, a long document).  Sending
//! it as one message would stall every other message on the connection, so
//! from tier 1.6 the payload is streamed:
//!
//! ```text
//! DCLP id seq mark=1 "52431"      start: the decimal total size
//! DCLP id seq mark=2 <32 KiB>     data, repeated
//! DCLP id seq mark=2 <rest>
//! DCLP id seq mark=3 ""           end
//! ```
//!
//! [`ClipboardSender`] produces one such message per call, so the orchestrator
//! can interleave other traffic and stop when the socket backs up.
//! [`ClipboardAssembler`] rebuilds the payload on the other side and only hands
//! out complete, size-checked transfers.
//!
//! Below tier 1.6 the whole payload goes as a single unmarked `DCLP`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::messages::{ChunkMark, ClipboardChunk, ClipboardId, Message};
use crate::protocol::version::Tier;

/// Largest data slice carried by one chunk.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Largest clipboard the default [`ClipboardAssembler`] accepts.
pub const MAX_CLIPBOARD_SIZE: usize = 64 * 1024 * 1024;

/// Reasons an incoming transfer was aborted.  The partial data is discarded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("{id}: chunk without a start")]
    NotStarted { id: ClipboardId },

    #[error("{id}: chunk for sequence {got}, transfer is {expected}")]
    SequenceMismatch {
        id: ClipboardId,
        expected: u32,
        got: u32,
    },

    #[error("{id}: invalid declared size {text:?}")]
    BadSize { id: ClipboardId, text: String },

    #[error("{id}: received more than the declared {declared} bytes")]
    Overflow { id: ClipboardId, declared: usize },

    #[error("{id}: declared {declared} bytes, received {received}")]
    SizeMismatch {
        id: ClipboardId,
        declared: usize,
        received: usize,
    },
}

/// A fully received clipboard payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedClipboard {
    pub id: ClipboardId,
    pub seq: u32,
    pub data: Vec<u8>,
}

// ── Sending ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendStage {
    Whole,
    Start,
    Data { offset: usize },
    End,
}

#[derive(Debug)]
struct Outgoing {
    seq: u32,
    data: Vec<u8>,
    stage: SendStage,
}

/// Splits outgoing clipboard payloads into protocol messages, one per step.
#[derive(Debug)]
pub struct ClipboardSender {
    chunked: bool,
    pending: BTreeMap<ClipboardId, Outgoing>,
}

impl ClipboardSender {
    /// Creates a sender for a session negotiated at `tier`.
    pub fn new(tier: Tier) -> Self {
        Self {
            chunked: tier.capabilities().clipboard_chunking,
            pending: BTreeMap::new(),
        }
    }

    /// Queues `data` for clipboard `id`.
    ///
    /// An unfinished transfer for the same clipboard is dropped; the receiver
    /// sees the new start and discards what it had.
    pub fn begin(&mut self, id: ClipboardId, seq: u32, data: Vec<u8>) {
        let stage = if self.chunked {
            SendStage::Start
        } else {
            SendStage::Whole
        };
        self.pending.insert(id, Outgoing { seq, data, stage });
    }

    /// Stops the transfer for `id`.  Returns `true` if one was in progress.
    pub fn cancel(&mut self, id: ClipboardId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Stops every transfer.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Produces the next message of the lowest-numbered pending clipboard.
    pub fn next_message(&mut self) -> Option<Message> {
        let (&id, transfer) = self.pending.iter_mut().next()?;
        let (mark, data, next) = match transfer.stage {
            SendStage::Whole => (ChunkMark::Whole, std::mem::take(&mut transfer.data), None),
            SendStage::Start => (
                ChunkMark::Start,
                transfer.data.len().to_string().into_bytes(),
                Some(SendStage::Data { offset: 0 }),
            ),
            SendStage::Data { offset } if offset < transfer.data.len() => {
                let end = (offset + CHUNK_SIZE).min(transfer.data.len());
                (
                    ChunkMark::Data,
                    transfer.data[offset..end].to_vec(),
                    Some(SendStage::Data { offset: end }),
                )
            }
            SendStage::Data { .. } | SendStage::End => (ChunkMark::End, Vec::new(), None),
        };
        let seq = transfer.seq;
        let finished = match next {
            Some(stage) => {
                transfer.stage = stage;
                false
            }
            None => true,
        };
        if finished {
            self.pending.remove(&id);
        }
        Some(Message::ClipboardData(ClipboardChunk {
            id,
            seq,
            mark,
            data,
        }))
    }
}

// ── Receiving ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Incoming {
    seq: u32,
    declared: usize,
    buf: Vec<u8>,
}

/// Rebuilds clipboard payloads from incoming chunks, one transfer per clipboard.
#[derive(Debug)]
pub struct ClipboardAssembler {
    pending: BTreeMap<ClipboardId, Incoming>,
    max_size: usize,
}

impl ClipboardAssembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_CLIPBOARD_SIZE)
    }

    /// Creates an assembler that refuses transfers declaring more than
    /// `max_size` bytes.
    pub fn with_limit(max_size: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            max_size,
        }
    }

    /// Feeds one chunk.
    ///
    /// Returns `Ok(Some(_))` when the chunk completes a transfer and `Ok(None)`
    /// while more chunks are expected.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the chunk breaks the start/data/end
    /// sequence or the sizes disagree.  The transfer for that clipboard is
    /// aborted and nothing is delivered.
    pub fn push(
        &mut self,
        chunk: ClipboardChunk,
    ) -> Result<Option<CompletedClipboard>, TransferError> {
        let id = chunk.id;
        match chunk.mark {
            ChunkMark::Whole => {
                self.pending.remove(&id);
                Ok(Some(CompletedClipboard {
                    id,
                    seq: chunk.seq,
                    data: chunk.data,
                }))
            }
            ChunkMark::Start => {
                // A new start supersedes whatever was in flight.
                self.pending.remove(&id);
                let declared = std::str::from_utf8(&chunk.data)
                    .ok()
                    .and_then(|text| text.trim().parse::<usize>().ok())
                    .filter(|&size| size <= self.max_size)
                    .ok_or_else(|| TransferError::BadSize {
                        id,
                        text: String::from_utf8_lossy(&chunk.data).into_owned(),
                    })?;
                self.pending.insert(
                    id,
                    Incoming {
                        seq: chunk.seq,
                        declared,
                        buf: Vec::new(),
                    },
                );
                Ok(None)
            }
            ChunkMark::Data => {
                let transfer = self.checked(id, chunk.seq)?;
                if transfer.buf.len() + chunk.data.len() > transfer.declared {
                    let declared = transfer.declared;
                    self.pending.remove(&id);
                    return Err(TransferError::Overflow { id, declared });
                }
                transfer.buf.extend_from_slice(&chunk.data);
                Ok(None)
            }
            ChunkMark::End => {
                self.checked(id, chunk.seq)?;
                let Some(transfer) = self.pending.remove(&id) else {
                    return Err(TransferError::NotStarted { id });
                };
                if transfer.buf.len() != transfer.declared {
                    return Err(TransferError::SizeMismatch {
                        id,
                        declared: transfer.declared,
                        received: transfer.buf.len(),
                    });
                }
                Ok(Some(CompletedClipboard {
                    id,
                    seq: transfer.seq,
                    data: transfer.buf,
                }))
            }
        }
    }

    /// Returns `true` while a transfer for `id` is incomplete.
    pub fn is_receiving(&self, id: ClipboardId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Looks up the running transfer for `id`, aborting it on a sequence mismatch.
    fn checked(&mut self, id: ClipboardId, seq: u32) -> Result<&mut Incoming, TransferError> {
        let expected = match self.pending.get(&id) {
            None => return Err(TransferError::NotStarted { id }),
            Some(transfer) => transfer.seq,
        };
        if expected != seq {
            self.pending.remove(&id);
            return Err(TransferError::SequenceMismatch {
                id,
                expected,
                got: seq,
            });
        }
        self.pending
            .get_mut(&id)
            .ok_or(TransferError::NotStarted { id })
    }
}

impl Default for ClipboardAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sender: &mut ClipboardSender) -> Vec<ClipboardChunk> {
        std::iter::from_fn(|| sender.next_message())
            .map(|msg| match msg {
                Message::ClipboardData(chunk) => chunk,
                other => panic!("unexpected message {other:?}"),
            })
            .collect()
    }

    fn chunk(mark: ChunkMark, seq: u32, data: &[u8]) -> ClipboardChunk {
        ClipboardChunk {
            id: ClipboardId::CLIPBOARD,
            seq,
            mark,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_sender_streams_start_data_end() {
        // Arrange – just over two chunks
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| i as u8).collect();
        let mut sender = ClipboardSender::new(Tier::V1_6);

        // Act
        sender.begin(ClipboardId::CLIPBOARD, 7, payload.clone());
        let chunks = drain(&mut sender);

        // Assert
        let marks: Vec<ChunkMark> = chunks.iter().map(|c| c.mark).collect();
        assert_eq!(
            marks,
            [
                ChunkMark::Start,
                ChunkMark::Data,
                ChunkMark::Data,
                ChunkMark::Data,
                ChunkMark::End
            ]
        );
        assert_eq!(chunks[0].data, payload.len().to_string().into_bytes());
        assert!(chunks.iter().all(|c| c.data.len() <= CHUNK_SIZE));
        assert!(chunks.iter().all(|c| c.seq == 7));
        assert!(chunks[4].data.is_empty());
        assert!(sender.is_idle());
    }

    #[test]
    fn test_sender_below_1_6_sends_one_whole_message() {
        let mut sender = ClipboardSender::new(Tier::V1_5);
        sender.begin(ClipboardId::SELECTION, 2, b"abc".to_vec());

        let chunks = drain(&mut sender);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].mark, ChunkMark::Whole);
        assert_eq!(chunks[0].data, b"abc");
    }

    #[test]
    fn test_sender_empty_payload_is_start_then_end() {
        let mut sender = ClipboardSender::new(Tier::V1_6);
        sender.begin(ClipboardId::CLIPBOARD, 1, Vec::new());

        let marks: Vec<ChunkMark> = drain(&mut sender).iter().map(|c| c.mark).collect();

        assert_eq!(marks, [ChunkMark::Start, ChunkMark::End]);
    }

    #[test]
    fn test_begin_supersedes_unfinished_transfer() {
        // Arrange
        let mut sender = ClipboardSender::new(Tier::V1_6);
        sender.begin(ClipboardId::CLIPBOARD, 1, vec![0; CHUNK_SIZE * 3]);
        sender.next_message();
        sender.next_message();

        // Act
        sender.begin(ClipboardId::CLIPBOARD, 2, b"new".to_vec());
        let chunks = drain(&mut sender);

        // Assert – restarts from the new start, old data gone
        assert_eq!(chunks[0].mark, ChunkMark::Start);
        assert!(chunks.iter().all(|c| c.seq == 2));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_cancel_stops_transfer_immediately() {
        let mut sender = ClipboardSender::new(Tier::V1_6);
        sender.begin(ClipboardId::CLIPBOARD, 1, b"data".to_vec());
        sender.next_message();

        assert!(sender.cancel(ClipboardId::CLIPBOARD));
        assert_eq!(sender.next_message(), None);
        assert!(!sender.cancel(ClipboardId::CLIPBOARD));
    }

    #[test]
    fn test_assembler_rebuilds_sender_output() {
        // Arrange
        let payload: Vec<u8> = (0..(CHUNK_SIZE + 123)).map(|i| (i % 251) as u8).collect();
        let mut sender = ClipboardSender::new(Tier::V1_8);
        sender.begin(ClipboardId::CLIPBOARD, 9, payload.clone());
        let mut assembler = ClipboardAssembler::new();

        // Act
        let mut completed = Vec::new();
        for c in drain(&mut sender) {
            if let Some(done) = assembler.push(c).unwrap() {
                completed.push(done);
            }
        }

        // Assert
        assert_eq!(
            completed,
            [CompletedClipboard {
                id: ClipboardId::CLIPBOARD,
                seq: 9,
                data: payload
            }]
        );
        assert!(!assembler.is_receiving(ClipboardId::CLIPBOARD));
    }

    #[test]
    fn test_assembler_discards_size_mismatch_at_end() {
        // Arrange
        let mut assembler = ClipboardAssembler::new();
        assembler.push(chunk(ChunkMark::Start, 1, b"10")).unwrap();
        assembler.push(chunk(ChunkMark::Data, 1, b"short")).unwrap();

        // Act
        let result = assembler.push(chunk(ChunkMark::End, 1, b""));

        // Assert
        assert_eq!(
            result,
            Err(TransferError::SizeMismatch {
                id: ClipboardId::CLIPBOARD,
                declared: 10,
                received: 5
            })
        );
        assert!(!assembler.is_receiving(ClipboardId::CLIPBOARD));
    }

    #[test]
    fn test_assembler_rejects_chunk_without_start() {
        let mut assembler = ClipboardAssembler::new();
        assert_eq!(
            assembler.push(chunk(ChunkMark::Data, 1, b"x")),
            Err(TransferError::NotStarted {
                id: ClipboardId::CLIPBOARD
            })
        );
        assert_eq!(
            assembler.push(chunk(ChunkMark::End, 1, b"")),
            Err(TransferError::NotStarted {
                id: ClipboardId::CLIPBOARD
            })
        );
    }

    #[test]
    fn test_assembler_aborts_on_sequence_change() {
        let mut assembler = ClipboardAssembler::new();
        assembler.push(chunk(ChunkMark::Start, 1, b"2")).unwrap();

        let result = assembler.push(chunk(ChunkMark::Data, 2, b"ab"));

        assert!(matches!(result, Err(TransferError::SequenceMismatch { .. })));
        // The aborted transfer cannot be finished afterwards.
        assert!(matches!(
            assembler.push(chunk(ChunkMark::End, 1, b"")),
            Err(TransferError::NotStarted { .. })
        ));
    }

    #[test]
    fn test_assembler_aborts_on_overflow() {
        let mut assembler = ClipboardAssembler::new();
        assembler.push(chunk(ChunkMark::Start, 1, b"3")).unwrap();

        let result = assembler.push(chunk(ChunkMark::Data, 1, b"four"));

        assert_eq!(
            result,
            Err(TransferError::Overflow {
                id: ClipboardId::CLIPBOARD,
                declared: 3
            })
        );
    }

    #[test]
    fn test_assembler_rejects_non_numeric_size() {
        let mut assembler = ClipboardAssembler::new();
        assert!(matches!(
            assembler.push(chunk(ChunkMark::Start, 1, b"lots")),
            Err(TransferError::BadSize { .. })
        ));
    }

    #[test]
    fn test_assembler_rejects_declared_size_above_limit() {
        // Arrange
        let mut assembler = ClipboardAssembler::with_limit(8);

        // Act
        let too_big = assembler.push(chunk(ChunkMark::Start, 1, b"9"));
        let at_limit = assembler.push(chunk(ChunkMark::Start, 1, b"8"));

        // Assert
        assert_eq!(
            too_big,
            Err(TransferError::BadSize {
                id: ClipboardId::CLIPBOARD,
                text: "9".to_string()
            })
        );
        assert_eq!(at_limit, Ok(None));
        assert!(assembler.is_receiving(ClipboardId::CLIPBOARD));
    }

    #[test]
    fn test_default_limit_refuses_absurd_declared_size() {
        let mut assembler = ClipboardAssembler::new();
        let huge = (MAX_CLIPBOARD_SIZE + 1).to_string();

        let result = assembler.push(chunk(ChunkMark::Start, 1, huge.as_bytes()));

        assert!(matches!(result, Err(TransferError::BadSize { .. })));
        assert!(!assembler.is_receiving(ClipboardId::CLIPBOARD));
    }

    #[test]
    fn test_new_start_supersedes_partial_transfer() {
        let mut assembler = ClipboardAssembler::new();
        assembler.push(chunk(ChunkMark::Start, 1, b"4")).unwrap();
        assembler.push(chunk(ChunkMark::Data, 1, b"ab")).unwrap();

        assembler.push(chunk(ChunkMark::Start, 2, b"1")).unwrap();
        assembler.push(chunk(ChunkMark::Data, 2, b"z")).unwrap();
        let done = assembler.push(chunk(ChunkMark::End, 2, b"")).unwrap();

        assert_eq!(done.map(|d| d.data), Some(b"z".to_vec()));
    }

    #[test]
    fn test_whole_message_completes_immediately() {
        let mut assembler = ClipboardAssembler::new();
        let done = assembler
            .push(chunk(ChunkMark::Whole, 3, b"text"))
            .unwrap()
            .unwrap();
        assert_eq!(done.data, b"text");
        assert_eq!(done.seq, 3);
    }
}
