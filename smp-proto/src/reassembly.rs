use bytes::{Bytes, BytesMut};

use crate::frame::{FrameError, Header};

/// Accumulates the fragments of one response into a complete message
///
/// The first fragment must carry the full SMP header; the expected total
/// length is derived from its length field and the buffer is allocated to
/// that capacity up front. Subsequent fragments append until the buffer
/// reaches the expected length.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    expected: usize,
}

impl Reassembler {
    /// Begin reassembly from the first fragment of a response
    ///
    /// Fails if the fragment cannot yield a header, which makes the total
    /// length unknowable and is a framing error.
    pub fn new(first: &[u8]) -> Result<Self, FrameError> {
        let header = Header::parse(first)?;
        let expected = header.total_len();
        let mut buf = BytesMut::with_capacity(expected.max(first.len()));
        buf.extend_from_slice(first);
        Ok(Self { buf, expected })
    }

    /// Append a continuation fragment
    pub fn push(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// Whether the accumulated bytes cover the expected length
    pub fn is_complete(&self) -> bool {
        self.buf.len() >= self.expected
    }

    /// Total length declared by the first fragment's header
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of bytes accumulated so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes have been accumulated
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the reassembler, yielding the complete message
    pub fn into_message(self) -> Bytes {
        debug_assert!(self.is_complete());
        self.buf.freeze()
    }
}
