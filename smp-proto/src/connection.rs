use thiserror::Error;
use tracing::{debug, trace};

/// Lifecycle of the peripheral carrying the SMP characteristic
///
/// Transitions are driven only by link events, never by polling. `Connected`
/// is the only state in which requests may be sent without re-running
/// discovery.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeripheralState {
    /// No link to the peripheral
    Disconnected,
    /// A connection attempt is outstanding
    Connecting,
    /// Link established; service and characteristic discovery in progress
    Initializing,
    /// Discovery complete and notifications enabled; ready for traffic
    Connected,
    /// Teardown initiated; waiting for the link-level disconnect event
    Disconnecting,
}

/// State of the platform radio backing the link
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RadioState {
    /// The platform has not reported a state yet
    Unknown,
    /// This host has no usable radio
    Unsupported,
    /// The application is not permitted to use the radio
    Unauthorized,
    /// The radio is switched off
    PoweredOff,
    /// The radio is usable
    PoweredOn,
}

impl RadioState {
    /// Whether the radio can ever become usable without user intervention
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Unknown | Self::PoweredOn)
    }
}

/// Capabilities reported for a discovered characteristic
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CharacteristicProps {
    /// Supports notifications
    pub notify: bool,
    /// Supports acknowledged writes
    pub write: bool,
    /// Supports writes without response
    pub write_without_response: bool,
}

/// What a caller must do to reach the `Connected` state
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Readiness {
    /// Already connected; requests may be sent
    Ready,
    /// Connection or discovery is underway; wait for a state change
    InProgress,
    /// No attempt is underway; the caller must initiate a link connect
    Start,
}

/// Errors that end a connection attempt
///
/// Discovery failures are terminal for the attempt and are reported to the
/// requests that triggered it; `Busy` alone is retryable after a pause.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConnectError {
    /// The radio is off, unauthorized, or absent
    #[error("radio unavailable ({0:?})")]
    RadioUnavailable(RadioState),
    /// A disconnect is in progress; connecting on top of it is not allowed
    #[error("disconnect in progress, wait and retry")]
    Busy,
    /// The link-level connection attempt failed
    #[error("connection attempt failed")]
    Failed,
    /// The peripheral does not expose the SMP service
    #[error("SMP service not found")]
    ServiceNotFound,
    /// The SMP service lacks the expected characteristic
    #[error("SMP characteristic not found")]
    CharacteristicNotFound,
    /// The characteristic cannot deliver notifications
    #[error("SMP characteristic does not support notifications")]
    NotifyUnsupported,
    /// The characteristic accepts no writes of either kind
    #[error("SMP characteristic does not support writes")]
    WriteUnsupported,
    /// The peer rejected enabling notifications
    #[error("enabling notifications failed")]
    SubscribeFailed,
    /// The connection attempt outlived the connect timeout
    #[error("connection attempt timed out")]
    Timeout,
}

/// Connection lifecycle state machine
///
/// Owns the `PeripheralState` transitions and validates each step of the
/// discovery ladder (service, characteristic, notification enable). The
/// driver performs the physical operations and reports their outcomes here.
#[derive(Debug)]
pub struct Connection {
    state: PeripheralState,
    radio: RadioState,
}

impl Connection {
    /// Create a state machine for a disconnected peripheral
    pub fn new(radio: RadioState) -> Self {
        Self {
            state: PeripheralState::Disconnected,
            radio,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PeripheralState {
        self.state
    }

    /// Current radio state
    pub fn radio(&self) -> RadioState {
        self.radio
    }

    /// Determine whether request traffic may flow, and if not, what has to
    /// happen first
    ///
    /// Transitions to `Connecting` when it asks the caller to start an
    /// attempt, so concurrent callers observe the attempt as in progress.
    pub fn readiness(&mut self) -> Result<Readiness, ConnectError> {
        if !self.radio.is_usable() {
            return Err(ConnectError::RadioUnavailable(self.radio));
        }
        if self.radio == RadioState::Unknown {
            // Wait for the manager to report in before touching the link
            return Ok(Readiness::InProgress);
        }
        match self.state {
            PeripheralState::Connected => Ok(Readiness::Ready),
            PeripheralState::Connecting | PeripheralState::Initializing => {
                Ok(Readiness::InProgress)
            }
            PeripheralState::Disconnecting => Err(ConnectError::Busy),
            PeripheralState::Disconnected => {
                self.state = PeripheralState::Connecting;
                Ok(Readiness::Start)
            }
        }
    }

    /// The platform reported a new radio state
    pub fn on_radio_state(&mut self, radio: RadioState) {
        trace!(?radio, "radio state changed");
        self.radio = radio;
    }

    /// The link-level connection succeeded; discovery begins
    pub fn on_connected(&mut self) {
        debug!("link connected, starting discovery");
        self.state = PeripheralState::Initializing;
    }

    /// The link-level connection attempt failed
    pub fn on_connect_failed(&mut self) {
        self.state = PeripheralState::Disconnected;
    }

    /// Service discovery finished
    pub fn on_service_discovered(&mut self, found: bool) -> Result<(), ConnectError> {
        if !found {
            return Err(ConnectError::ServiceNotFound);
        }
        Ok(())
    }

    /// Characteristic discovery finished
    pub fn on_characteristic_discovered(
        &mut self,
        props: Option<CharacteristicProps>,
    ) -> Result<(), ConnectError> {
        let props = props.ok_or(ConnectError::CharacteristicNotFound)?;
        if !props.notify {
            return Err(ConnectError::NotifyUnsupported);
        }
        if !props.write && !props.write_without_response {
            return Err(ConnectError::WriteUnsupported);
        }
        Ok(())
    }

    /// The notification subscription attempt finished
    ///
    /// Only on success does the peripheral become `Connected`; the caller
    /// caches the characteristic handle at this point and not before.
    pub fn on_notifications_enabled(&mut self, ok: bool) -> Result<(), ConnectError> {
        if !ok {
            return Err(ConnectError::SubscribeFailed);
        }
        debug!("notifications enabled, peripheral connected");
        self.state = PeripheralState::Connected;
        Ok(())
    }

    /// Begin teardown
    ///
    /// Returns whether the caller must cancel the underlying link connection.
    /// Idempotent: closing a disconnected peripheral is a no-op.
    pub fn close(&mut self) -> bool {
        match self.state {
            PeripheralState::Connecting
            | PeripheralState::Initializing
            | PeripheralState::Connected => {
                self.state = PeripheralState::Disconnecting;
                true
            }
            PeripheralState::Disconnecting | PeripheralState::Disconnected => false,
        }
    }

    /// The link reported the connection is gone
    pub fn on_disconnected(&mut self) {
        debug!("link disconnected");
        self.state = PeripheralState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn happy_path_to_connected() {
        let mut conn = Connection::new(RadioState::PoweredOn);
        assert_matches!(conn.readiness(), Ok(Readiness::Start));
        assert_eq!(conn.state(), PeripheralState::Connecting);
        assert_matches!(conn.readiness(), Ok(Readiness::InProgress));
        conn.on_connected();
        assert_eq!(conn.state(), PeripheralState::Initializing);
        conn.on_service_discovered(true).unwrap();
        conn.on_characteristic_discovered(Some(CharacteristicProps {
            notify: true,
            write: true,
            write_without_response: true,
        }))
        .unwrap();
        conn.on_notifications_enabled(true).unwrap();
        assert_eq!(conn.state(), PeripheralState::Connected);
        assert_matches!(conn.readiness(), Ok(Readiness::Ready));
    }

    #[test]
    fn radio_off_is_a_hard_error() {
        let mut conn = Connection::new(RadioState::PoweredOff);
        assert_matches!(
            conn.readiness(),
            Err(ConnectError::RadioUnavailable(RadioState::PoweredOff))
        );
        conn.on_radio_state(RadioState::Unsupported);
        assert_matches!(
            conn.readiness(),
            Err(ConnectError::RadioUnavailable(RadioState::Unsupported))
        );
    }

    #[test]
    fn unknown_radio_waits_instead_of_connecting() {
        let mut conn = Connection::new(RadioState::Unknown);
        assert_matches!(conn.readiness(), Ok(Readiness::InProgress));
        assert_eq!(conn.state(), PeripheralState::Disconnected);
        conn.on_radio_state(RadioState::PoweredOn);
        assert_matches!(conn.readiness(), Ok(Readiness::Start));
    }

    #[test]
    fn connecting_during_disconnect_is_refused() {
        let mut conn = Connection::new(RadioState::PoweredOn);
        conn.readiness().unwrap();
        conn.on_connected();
        conn.on_service_discovered(true).unwrap();
        assert!(conn.close());
        assert_eq!(conn.state(), PeripheralState::Disconnecting);
        assert_matches!(conn.readiness(), Err(ConnectError::Busy));
        conn.on_disconnected();
        assert_matches!(conn.readiness(), Ok(Readiness::Start));
    }

    #[test]
    fn discovery_failures_are_terminal() {
        let mut conn = Connection::new(RadioState::PoweredOn);
        conn.readiness().unwrap();
        conn.on_connected();
        assert_matches!(
            conn.on_service_discovered(false),
            Err(ConnectError::ServiceNotFound)
        );

        assert_matches!(
            conn.on_characteristic_discovered(None),
            Err(ConnectError::CharacteristicNotFound)
        );
        assert_matches!(
            conn.on_characteristic_discovered(Some(CharacteristicProps {
                notify: false,
                write: true,
                write_without_response: true,
            })),
            Err(ConnectError::NotifyUnsupported)
        );
        assert_matches!(
            conn.on_characteristic_discovered(Some(CharacteristicProps {
                notify: true,
                ..Default::default()
            })),
            Err(ConnectError::WriteUnsupported)
        );
        assert_matches!(
            conn.on_notifications_enabled(false),
            Err(ConnectError::SubscribeFailed)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = Connection::new(RadioState::PoweredOn);
        assert!(!conn.close());
        conn.readiness().unwrap();
        assert!(conn.close());
        assert!(!conn.close());
        conn.on_disconnected();
        assert!(!conn.close());
    }
}
