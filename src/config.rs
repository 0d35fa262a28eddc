//! Peripheral configuration.

use std::time::Duration;

/// Tunables for a [`Peripheral`](crate::Peripheral).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralConfig {
    /// Upper bound on connect, disconnect and discovery requests.
    /// `None` waits for the controller indefinitely.
    pub operation_timeout: Option<Duration>,
    /// How long `update_rssi` waits for the controller to report a value.
    pub rssi_timeout: Duration,
    /// Capacity of the peripheral event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Some(Duration::from_secs(30)),
            rssi_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

impl PeripheralConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the RSSI timeout.
    pub fn with_rssi_timeout(mut self, timeout: Duration) -> Self {
        self.rssi_timeout = timeout;
        self
    }

    /// Set the event channel capacity (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeripheralConfig::default();
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.rssi_timeout, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_builders() {
        let config = PeripheralConfig::new()
            .with_operation_timeout(None)
            .with_rssi_timeout(Duration::from_millis(250))
            .with_event_capacity(0);
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.rssi_timeout, Duration::from_millis(250));
        assert_eq!(config.event_capacity, 1);
    }
}
