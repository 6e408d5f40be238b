//! Reliable SMP (mcumgr) request/response transport over Bluetooth Low Energy
//!
//! BLE gives a device firmware channel none of the properties a management
//! protocol needs: writes are fire-and-forget, responses arrive as unsolicited
//! notifications, payloads are capped by a small negotiated MTU, and the link
//! can drop at any moment. [`SmpTransport`] layers reliability on top:
//! lazy connection setup with GATT discovery, sequence-number correlation of
//! requests to (possibly fragmented) responses, MTU-aware chunking that never
//! interleaves two messages on the wire, bounded retries, and clean teardown
//! that fails every pending request exactly once.
//!
//! The platform Bluetooth stack is abstracted behind the [`BleLink`] trait;
//! this crate ships no platform backend. Protocol state machines live in the
//! I/O-free `smp-proto` crate and are re-exported here.

#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod link;
mod observer;
mod transport;

pub use proto::{
    CharacteristicProps, ConfigError, ConnectError, FrameError, Header, InsufficientMtu,
    PeripheralState, RadioState, SequenceNumber, TransportConfig, DEFAULT_MTU, HEADER_LEN,
    MAX_MTU, MIN_MTU,
};

pub use crate::link::{
    BleLink, Characteristic, CharacteristicHandle, LinkError, LinkEvent, ServiceHandle,
    SMP_CHARACTERISTIC_UUID, SMP_SERVICE_UUID,
};
pub use crate::observer::ConnectionObserver;
pub use crate::transport::{SendError, SmpTransport};
