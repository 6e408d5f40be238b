//! Deterministic protocol logic for the SMP management protocol over BLE
//!
//! smp-proto contains the transport's protocol state independent of any I/O:
//! the SMP frame header codec, the MTU/chunking policy, response reassembly,
//! the pending-request table, the reorder buffer that keeps pipelined chunk
//! writes from interleaving, and the connection lifecycle state machine. It
//! contains no networking code and takes no timestamps from the operating
//! system. Most users want the futures-based smp-ble API instead, which
//! drives these state machines from platform BLE events.

#![warn(missing_docs)]
#![cfg_attr(test, allow(dead_code))]

mod chunk;
mod config;
mod connection;
mod frame;
mod reassembly;
mod retry;
mod rob;
mod write_state;

pub use crate::chunk::{plan_writes, InsufficientMtu};
pub use crate::config::{clamp_mtu, ConfigError, TransportConfig, DEFAULT_MTU, MAX_MTU, MIN_MTU};
pub use crate::connection::{
    CharacteristicProps, ConnectError, Connection, PeripheralState, RadioState, Readiness,
};
pub use crate::frame::{FrameError, Header, HEADER_LEN};
pub use crate::reassembly::Reassembler;
pub use crate::retry::{AttemptBudget, ErrorClass};
pub use crate::rob::{ChunkWrite, ReorderBuffer};
pub use crate::write_state::{Received, SequenceInUse, WriteState};

/// Sequence number correlating a request with its response
///
/// Carried in byte 6 of the SMP header. The one-byte range bounds how many
/// requests can be in flight on one transport at a time.
pub type SequenceNumber = u8;
