use bytes::Bytes;
use thiserror::Error;

/// Split an outgoing message into physical writes that fit the link's MTU
///
/// A message no larger than `mtu` becomes a single write. A larger message is
/// split into `ceil(len / mtu)` order-preserving chunks of at most `mtu`
/// bytes when `chunking` is enabled; with chunking disabled the caller gets
/// the current MTU back so it can adapt and resubmit.
///
/// The slices share the underlying buffer; no payload bytes are copied.
pub fn plan_writes(
    payload: &Bytes,
    mtu: usize,
    chunking: bool,
) -> Result<Vec<Bytes>, InsufficientMtu> {
    debug_assert!(mtu > 0);
    if payload.len() <= mtu {
        return Ok(vec![payload.clone()]);
    }
    if !chunking {
        return Err(InsufficientMtu {
            mtu,
            len: payload.len(),
        });
    }
    let mut chunks = Vec::with_capacity(payload.len().div_ceil(mtu));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + mtu).min(payload.len());
        chunks.push(payload.slice(offset..end));
        offset = end;
    }
    Ok(chunks)
}

/// A message exceeded the link MTU while chunking was disabled
///
/// Carries the MTU in force so the caller can decide its own recovery, e.g.
/// enabling chunking and resubmitting the same logical request.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("payload of {len} bytes exceeds the link MTU of {mtu} and chunking is disabled")]
pub struct InsufficientMtu {
    /// MTU in force when the message was rejected
    pub mtu: usize,
    /// Length of the rejected message
    pub len: usize,
}
