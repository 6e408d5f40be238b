use std::time::Duration;

use thiserror::Error;

/// Smallest MTU the protocol tolerates (minimum ATT payload)
pub const MIN_MTU: usize = 20;
/// Largest single-write payload the transport will attempt
pub const MAX_MTU: usize = 1024;
/// Assumed MTU until the link reports its write-without-response limit
pub const DEFAULT_MTU: usize = 253;

/// Parameters governing transport-level behavior
///
/// Defaults are suitable for talking to mcumgr peers over BLE. Setters use
/// the builder-in-place style; validated setters return `ConfigError` on out
/// of range values.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub(crate) max_in_flight: usize,
    pub(crate) chunking: bool,
    pub(crate) initial_mtu: usize,
    pub(crate) send_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) max_attempts: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            chunking: false,
            initial_mtu: DEFAULT_MTU,
            send_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(20),
            retry_interval: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

impl TransportConfig {
    /// Maximum number of requests in flight at once
    ///
    /// 1 serializes requests; larger values pipeline them over the shared
    /// link. Bounded above by the one-byte sequence number space.
    pub fn max_in_flight(&mut self, limit: usize) -> Result<&mut Self, ConfigError> {
        if limit == 0 || limit > u8::MAX as usize {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_in_flight = limit;
        Ok(self)
    }

    /// Whether outbound messages larger than the MTU are split into chunks
    ///
    /// With chunking disabled, oversized messages fail with the current MTU
    /// so the caller can adapt.
    pub fn chunking(&mut self, enabled: bool) -> &mut Self {
        self.chunking = enabled;
        self
    }

    /// MTU assumed before the link reports its own limit
    pub fn initial_mtu(&mut self, mtu: usize) -> Result<&mut Self, ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(ConfigError::OutOfBounds);
        }
        self.initial_mtu = mtu;
        Ok(self)
    }

    /// Per-request timeout, measured from the start of transmission
    pub fn send_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.send_timeout = timeout;
        self
    }

    /// Bound on connection setup including discovery, distinct from and
    /// longer than the per-request timeout
    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long to sleep before retrying after a transient busy condition
    pub fn retry_interval(&mut self, interval: Duration) -> &mut Self {
        self.retry_interval = interval;
        self
    }

    /// Attempts made per request before reporting a generic send failure
    pub fn max_attempts(&mut self, attempts: u8) -> Result<&mut Self, ConfigError> {
        if attempts == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    /// Configured in-flight limit
    pub fn get_max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Whether chunking is enabled
    pub fn get_chunking(&self) -> bool {
        self.chunking
    }

    /// Configured initial MTU
    pub fn get_initial_mtu(&self) -> usize {
        self.initial_mtu
    }

    /// Configured per-request timeout
    pub fn get_send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Configured connection setup timeout
    pub fn get_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Configured retry sleep interval
    pub fn get_retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Configured attempt limit
    pub fn get_max_attempts(&self) -> u8 {
        self.max_attempts
    }
}

/// Clamp a link-reported write limit to the protocol's MTU bounds
pub fn clamp_mtu(reported: usize) -> usize {
    reported.clamp(MIN_MTU, MAX_MTU)
}

/// Errors in transport configuration
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
    /// Value exceeds supported bounds
    #[error("illegal configuration value")]
    OutOfBounds,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn in_flight_limit_bounded_by_sequence_space() {
        let mut config = TransportConfig::default();
        assert_matches!(config.max_in_flight(0), Err(ConfigError::OutOfBounds));
        assert_matches!(config.max_in_flight(256), Err(ConfigError::OutOfBounds));
        config.max_in_flight(16).unwrap();
        assert_eq!(config.get_max_in_flight(), 16);
    }

    #[test]
    fn mtu_clamped_to_protocol_bounds() {
        assert_eq!(clamp_mtu(10), MIN_MTU);
        assert_eq!(clamp_mtu(247), 247);
        assert_eq!(clamp_mtu(4096), MAX_MTU);
        let mut config = TransportConfig::default();
        assert_matches!(config.initial_mtu(8), Err(ConfigError::OutOfBounds));
        config.initial_mtu(512).unwrap();
    }
}
