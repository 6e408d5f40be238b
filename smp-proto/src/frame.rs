use bytes::BufMut;
use thiserror::Error;

use crate::SequenceNumber;

/// Size of the SMP header in bytes
pub const HEADER_LEN: usize = 8;

/// The fixed 8-byte header prefixed to every SMP request and response
///
/// The transport treats the payload following the header as opaque; only the
/// sequence number (correlation) and the payload length (reassembly sizing)
/// are interpreted here. Multi-byte fields are big-endian, matching the peer
/// firmware's framing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    /// Raw first byte; the low three bits carry the operation, the rest are
    /// version/reserved bits preserved verbatim
    pub op: u8,
    /// Flags byte
    pub flags: u8,
    /// Length of the payload following the header
    pub payload_len: u16,
    /// Command group
    pub group: u16,
    /// Sequence number correlating request and response
    pub sequence: SequenceNumber,
    /// Command identifier within the group
    pub command: u8,
}

impl Header {
    /// Decode a header from the start of `bytes`
    ///
    /// Fails if fewer than [`HEADER_LEN`] bytes are available, which on the
    /// receive path means a first fragment too short to carry a header.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::UnderflowedHeader { len: bytes.len() });
        }
        Ok(Self {
            op: bytes[0],
            flags: bytes[1],
            payload_len: u16::from_be_bytes([bytes[2], bytes[3]]),
            group: u16::from_be_bytes([bytes[4], bytes[5]]),
            sequence: bytes[6],
            command: bytes[7],
        })
    }

    /// Encode the header into `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.op);
        buf.put_u8(self.flags);
        buf.put_u16(self.payload_len);
        buf.put_u16(self.group);
        buf.put_u8(self.sequence);
        buf.put_u8(self.command);
    }

    /// Total length of the message this header starts, header included
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// Errors caused by malformed framing
///
/// Always terminal for the affected request; a malformed frame indicates a
/// peer or protocol bug and is never retried.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FrameError {
    /// The first fragment was too short to contain the 8-byte header
    #[error("first fragment of {len} bytes cannot contain the {HEADER_LEN}-byte header")]
    UnderflowedHeader {
        /// Number of bytes actually available
        len: usize,
    },
}
