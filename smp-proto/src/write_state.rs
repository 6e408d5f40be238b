use std::collections::VecDeque;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use crate::frame::{FrameError, Header};
use crate::reassembly::Reassembler;
use crate::SequenceNumber;

/// Table of in-flight requests keyed by sequence number
///
/// Maps asynchronous, possibly fragmented notifications back to the request
/// waiting for them. Generic over the waiter handle `T` so protocol logic
/// stays independent of any runtime; the futures-based transport stores a
/// oneshot sender per request, tests store unit.
#[derive(Debug)]
pub struct WriteState<T> {
    pending: FxHashMap<SequenceNumber, PendingRequest<T>>,
    /// Sequence numbers with partially reassembled responses, in the order
    /// their first fragment arrived. Continuation fragments that carry no
    /// header are attributed to the front entry.
    receiving: VecDeque<SequenceNumber>,
}

#[derive(Debug)]
struct PendingRequest<T> {
    /// Absent until the first response fragment is observed
    reassembler: Option<Reassembler>,
    /// Taken when the response completes or fails; the entry then remains as
    /// a tombstone reserving the sequence number until `completed_write`
    waiter: Option<T>,
}

/// Outcome of feeding one notification fragment into the table
#[derive(Debug)]
pub enum Received<T> {
    /// More fragments are needed before the response completes
    Incomplete,
    /// The response is complete; the waiter is released with the full message
    Complete(T, Bytes),
    /// The response is unusable; the waiter is released with the error
    Failed(T, FrameError),
    /// No pending request matches this sequence number
    Unmatched,
    /// The matching request already completed; extra bytes are a peer
    /// protocol violation
    Stale,
}

/// A request is already pending under this sequence number
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("sequence number {0} already has a request in flight")]
pub struct SequenceInUse(pub SequenceNumber);

impl<T> WriteState<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            pending: FxHashMap::default(),
            receiving: VecDeque::new(),
        }
    }

    /// Number of live entries, tombstones included
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no requests are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a request about to begin transmission
    ///
    /// Sequence numbers must be unique among pending requests; a duplicate is
    /// rejected and the caller treats it as a transient busy condition.
    pub fn new_write(&mut self, seq: SequenceNumber, waiter: T) -> Result<(), SequenceInUse> {
        if self.pending.contains_key(&seq) {
            return Err(SequenceInUse(seq));
        }
        self.pending.insert(
            seq,
            PendingRequest {
                reassembler: None,
                waiter: Some(waiter),
            },
        );
        Ok(())
    }

    /// Determine which pending request a notification fragment belongs to
    ///
    /// A fragment that parses as a header whose sequence number matches a
    /// request still awaiting its first fragment starts that request's
    /// response. Anything else is a headerless continuation and belongs to
    /// the oldest response still mid-reassembly.
    pub fn resolve_sequence(&self, fragment: &[u8]) -> Option<SequenceNumber> {
        if let Ok(header) = Header::parse(fragment) {
            if let Some(entry) = self.pending.get(&header.sequence) {
                if entry.reassembler.is_none() && entry.waiter.is_some() {
                    return Some(header.sequence);
                }
            }
        }
        self.receiving.front().copied()
    }

    /// Feed a notification fragment to the request pending under `seq`
    pub fn received(&mut self, seq: SequenceNumber, fragment: &[u8]) -> Received<T> {
        let Some(entry) = self.pending.get_mut(&seq) else {
            warn!(seq, len = fragment.len(), "dropping notification with no pending request");
            return Received::Unmatched;
        };
        if entry.waiter.is_none() {
            warn!(seq, len = fragment.len(), "dropping bytes for an already completed request");
            return Received::Stale;
        }
        match entry.reassembler.take() {
            None => match Reassembler::new(fragment) {
                Ok(reassembler) if reassembler.is_complete() => {
                    let waiter = entry.waiter.take().expect("waiter checked above");
                    Received::Complete(waiter, reassembler.into_message())
                }
                Ok(reassembler) => {
                    entry.reassembler = Some(reassembler);
                    self.receiving.push_back(seq);
                    Received::Incomplete
                }
                Err(e) => {
                    let waiter = entry.waiter.take().expect("waiter checked above");
                    Received::Failed(waiter, e)
                }
            },
            Some(mut reassembler) => {
                reassembler.push(fragment);
                if reassembler.is_complete() {
                    self.receiving.retain(|&s| s != seq);
                    let waiter = entry.waiter.take().expect("waiter checked above");
                    Received::Complete(waiter, reassembler.into_message())
                } else {
                    entry.reassembler = Some(reassembler);
                    Received::Incomplete
                }
            }
        }
    }

    /// Remove a request's entry once its caller has consumed the outcome
    ///
    /// Called regardless of success or failure, freeing the sequence number
    /// for reuse.
    pub fn completed_write(&mut self, seq: SequenceNumber) {
        self.pending.remove(&seq);
        self.receiving.retain(|&s| s != seq);
    }

    /// Release one request's waiter after a link-level failure
    pub fn on_write_error(&mut self, seq: SequenceNumber) -> Option<T> {
        self.receiving.retain(|&s| s != seq);
        self.pending.get_mut(&seq).and_then(|entry| entry.waiter.take())
    }

    /// Release every waiter, used when the link drops out from under the
    /// transport
    ///
    /// Each pending request fails exactly once; entries are removed outright
    /// since the connection they belonged to is gone.
    pub fn on_error(&mut self) -> Vec<T> {
        self.receiving.clear();
        self.pending
            .drain()
            .filter_map(|(_, entry)| entry.waiter)
            .collect()
    }
}

impl<T> Default for WriteState<T> {
    fn default() -> Self {
        Self::new()
    }
}
