use std::cmp::Ordering;

use bytes::Bytes;

use crate::SequenceNumber;

/// One physical write queued for transmission
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkWrite {
    /// Sequence number of the message this chunk belongs to
    pub sequence: SequenceNumber,
    /// Position of this chunk within its message
    pub index: u16,
    /// Bytes to hand to the link in one write
    pub payload: Bytes,
    /// Whether transmission of this chunk's message has begun
    pub in_flight: bool,
}

impl Ord for ChunkWrite {
    // Total order over the pending queue: chunks of messages already being
    // transmitted first, then lower sequence numbers, then lower chunk
    // indices. Once a message's first chunk has gone out, its remainder
    // drains before any newly started message.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .in_flight
            .cmp(&self.in_flight)
            .then(self.sequence.cmp(&other.sequence))
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for ChunkWrite {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Serializes physical chunk writes for pipelined requests
///
/// Several logical requests may be queued at once; the buffer guarantees that
/// chunks of one message are never interleaved with another's on the wire,
/// even across backpressure pauses. Without this the receiver could not tell
/// which chunk belongs to which message, silently corrupting multi-packet
/// payloads.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    queue: Vec<ChunkWrite>,
    /// Sequence whose chunk is currently being handed to the link
    writing: Option<SequenceNumber>,
}

impl ReorderBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue all chunks of one message for transmission
    ///
    /// A no-op while the same sequence number is already queued or mid
    /// transmission, so a retry after a pause resumes the existing drain
    /// instead of duplicating writes. Returns whether the chunks were
    /// accepted.
    pub fn enqueue(&mut self, seq: SequenceNumber, chunks: Vec<Bytes>) -> bool {
        if self.contains(seq) || self.is_in_flight(seq) {
            return false;
        }
        self.queue
            .extend(chunks.into_iter().enumerate().map(|(index, payload)| ChunkWrite {
                sequence: seq,
                index: index as u16,
                payload,
                in_flight: false,
            }));
        self.queue.sort();
        true
    }

    /// Pop the next chunk to transmit, if any
    ///
    /// Marks the chunk's whole message in flight on its first pop, pinning
    /// the remaining chunks ahead of any newly enqueued message.
    pub fn poll_transmit(&mut self) -> Option<ChunkWrite> {
        if self.queue.is_empty() {
            return None;
        }
        let mut chunk = self.queue.remove(0);
        if !chunk.in_flight {
            chunk.in_flight = true;
            for pending in self.queue.iter_mut().filter(|c| c.sequence == chunk.sequence) {
                pending.in_flight = true;
            }
            self.queue.sort();
        }
        self.writing = Some(chunk.sequence);
        Some(chunk)
    }

    /// Record that the chunk last popped has been handed to the link
    pub fn written(&mut self) {
        self.writing = None;
    }

    /// Whether transmission of this sequence number has begun and not drained
    pub fn is_in_flight(&self, seq: SequenceNumber) -> bool {
        self.writing == Some(seq)
            || self.queue.iter().any(|c| c.sequence == seq && c.in_flight)
    }

    /// Whether any chunk for this sequence number is still queued
    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.queue.iter().any(|c| c.sequence == seq)
    }

    /// Drop all queued chunks for one sequence number
    pub fn remove(&mut self, seq: SequenceNumber) {
        self.queue.retain(|c| c.sequence != seq);
    }

    /// Drop everything, used at teardown
    pub fn clear(&mut self) {
        self.queue.clear();
        self.writing = None;
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
