use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use proto::{CharacteristicProps, RadioState};

/// GATT service hosting the SMP characteristic on mcumgr peers
pub const SMP_SERVICE_UUID: Uuid = Uuid::from_u128(0x8D53DC1D_1DB7_4CD3_868B_8A527460AA84);

/// The single read/write/notify characteristic carrying all SMP traffic
pub const SMP_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xDA2E7828_FBCE_4E01_AE9E_261174997C48);

/// Opaque token for a discovered GATT service
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ServiceHandle(pub u64);

/// Opaque token for a discovered GATT characteristic
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CharacteristicHandle(pub u64);

/// A discovered characteristic and its reported capabilities
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Characteristic {
    /// Token to address the characteristic in later operations
    pub handle: CharacteristicHandle,
    /// Property flags reported by the peer
    pub props: CharacteristicProps,
}

/// Failures reported by the platform BLE stack
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum LinkError {
    /// The operation requires an established link
    #[error("not connected")]
    NotConnected,
    /// The platform stack does not support the operation
    #[error("operation unsupported by the platform stack")]
    Unsupported,
    /// The platform stack reported a failure
    #[error("link failure: {0}")]
    Io(String),
}

/// Asynchronous events delivered by the platform BLE stack
///
/// Fed into the transport over the channel handed to
/// [`SmpTransport::new`](crate::SmpTransport::new); the transport's state
/// machines advance only in response to these.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The radio manager changed state
    RadioStateChanged(RadioState),
    /// The link-level connection was established
    Connected,
    /// The link-level connection attempt failed
    ConnectFailed,
    /// The link-level connection is gone, whether requested or not
    Disconnected,
    /// A notification arrived on a subscribed characteristic
    Notification {
        /// Characteristic that produced the value
        characteristic: CharacteristicHandle,
        /// Notified bytes; one fragment of at most the negotiated MTU
        value: Bytes,
    },
    /// Backpressure cleared; the link can accept more writes without response
    ReadyToWrite,
}

/// Boundary to the platform Bluetooth stack
///
/// The transport consumes this interface and never implements it; callers
/// supply an adapter for their platform (CoreBluetooth, BlueZ, a test mock).
/// One link serves one peripheral.
#[async_trait]
pub trait BleLink: Send + Sync + 'static {
    /// Current state of the radio manager
    fn radio_state(&self) -> RadioState;

    /// Initiate a connection to the peripheral
    ///
    /// Completion is reported via [`LinkEvent::Connected`] or
    /// [`LinkEvent::ConnectFailed`], not by this call.
    async fn connect(&self) -> Result<(), LinkError>;

    /// Cancel an established or in-progress connection
    ///
    /// The eventual [`LinkEvent::Disconnected`] confirms teardown.
    async fn cancel_connection(&self) -> Result<(), LinkError>;

    /// Look for a primary service by UUID
    async fn discover_service(&self, service: Uuid) -> Result<Option<ServiceHandle>, LinkError>;

    /// Look for a characteristic of `service` by UUID
    async fn discover_characteristic(
        &self,
        service: ServiceHandle,
        characteristic: Uuid,
    ) -> Result<Option<Characteristic>, LinkError>;

    /// Enable notifications on a characteristic
    async fn subscribe(&self, characteristic: CharacteristicHandle) -> Result<(), LinkError>;

    /// Disable notifications on a characteristic
    async fn unsubscribe(&self, characteristic: CharacteristicHandle) -> Result<(), LinkError>;

    /// Write without acknowledgment
    async fn write_without_response(
        &self,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), LinkError>;

    /// Write with acknowledgment
    async fn write_with_response(
        &self,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), LinkError>;

    /// Read the characteristic's current value
    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Bytes, LinkError>;

    /// Whether the link can accept another write without response right now
    ///
    /// When this reports `false` the transport pauses its drain until
    /// [`LinkEvent::ReadyToWrite`] arrives.
    fn can_write_without_response(&self) -> bool;

    /// The link's maximum write-without-response payload, in bytes
    ///
    /// Sampled once discovery completes and clamped to the protocol's MTU
    /// bounds.
    fn max_write_len(&self) -> usize;
}
