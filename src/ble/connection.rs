//! Connection state tracking.
//!
//! Holds the connection state machine for a single peripheral:
//! `Discovered -> Connecting -> Connected -> Disconnected`, with a failed
//! connection attempt falling back to where it started.

use tracing::debug;

use crate::error::{Error, Result};

/// Connection state for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Seen in an advertisement, never connected.
    #[default]
    Discovered,
    /// A connection request is outstanding.
    Connecting,
    /// Connected to the peripheral.
    Connected,
    /// Previously connected (or attempted), now disconnected.
    Disconnected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connect request may be issued from this state.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Discovered | Self::Disconnected)
    }

    /// Check if a disconnect request may be issued from this state.
    pub fn can_disconnect(&self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Opaque connection handle assigned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionHandle(pub u16);

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Connection state plus the handle owned while connected.
///
/// Every transition returns the state it replaced so callers can emit
/// change events without re-reading.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionStatus {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
}

impl ConnectionStatus {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Move to `Connecting`, returning the state to restore if the attempt fails.
    pub(crate) fn begin_connect(&mut self) -> Result<ConnectionState> {
        if !self.state.can_connect() {
            return Err(Error::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }
        let prior = self.state;
        self.state = ConnectionState::Connecting;
        Ok(prior)
    }

    /// Put back the state that preceded a failed connect request.
    ///
    /// Only applies while still `Connecting`; a disconnect notification that
    /// raced the failure wins.
    pub(crate) fn abort_connect(&mut self, prior: ConnectionState) -> bool {
        if self.state != ConnectionState::Connecting {
            debug!(
                "Not restoring {} after failed connect, state is now {}",
                prior, self.state
            );
            return false;
        }
        self.state = prior;
        true
    }

    pub(crate) fn mark_connected(&mut self, handle: ConnectionHandle) -> ConnectionState {
        let old = self.state;
        self.state = ConnectionState::Connected;
        self.handle = Some(handle);
        old
    }

    pub(crate) fn mark_disconnected(&mut self) -> ConnectionState {
        let old = self.state;
        if old != ConnectionState::Discovered || self.handle.is_some() {
            self.state = ConnectionState::Disconnected;
        }
        self.handle = None;
        old
    }

    pub(crate) fn ensure_disconnectable(&self) -> Result<()> {
        if self.state.can_disconnect() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation: "disconnect",
                state: self.state,
            })
        }
    }

    pub(crate) fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert_eq!(ConnectionState::default(), ConnectionState::Discovered);
    }

    #[test]
    fn test_allowed_requests() {
        assert!(ConnectionState::Discovered.can_connect());
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(!ConnectionState::Connecting.can_connect());
        assert!(!ConnectionState::Connected.can_connect());

        assert!(ConnectionState::Connected.can_disconnect());
        assert!(ConnectionState::Connecting.can_disconnect());
        assert!(!ConnectionState::Discovered.can_disconnect());
        assert!(!ConnectionState::Disconnected.can_disconnect());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Discovered), "Discovered");
        assert_eq!(format!("{}", ConnectionHandle(0x40)), "0x0040");
    }

    #[test]
    fn test_connect_cycle() {
        let mut status = ConnectionStatus::default();
        let prior = status.begin_connect().unwrap();
        assert_eq!(prior, ConnectionState::Discovered);
        assert_eq!(status.state(), ConnectionState::Connecting);

        assert!(status.begin_connect().is_err());

        status.mark_connected(ConnectionHandle(1));
        assert_eq!(status.handle(), Some(ConnectionHandle(1)));
        assert!(status.ensure_connected("discover services").is_ok());

        let old = status.mark_disconnected();
        assert_eq!(old, ConnectionState::Connected);
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert_eq!(status.handle(), None);
        assert!(status.begin_connect().is_ok());
    }

    #[test]
    fn test_failed_connect_restores_prior_state() {
        let mut status = ConnectionStatus::default();
        let prior = status.begin_connect().unwrap();
        assert!(status.abort_connect(prior));
        assert_eq!(status.state(), ConnectionState::Discovered);
    }

    #[test]
    fn test_abort_after_disconnect_notification_keeps_disconnected() {
        let mut status = ConnectionStatus::default();
        let prior = status.begin_connect().unwrap();
        status.mark_disconnected();
        assert!(!status.abort_connect(prior));
        assert_eq!(status.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_notification_before_any_connection_is_ignored() {
        let mut status = ConnectionStatus::default();
        status.mark_disconnected();
        assert_eq!(status.state(), ConnectionState::Discovered);
    }

    #[test]
    fn test_discovery_rejected_unless_connected() {
        let status = ConnectionStatus::default();
        let err = status.ensure_connected("discover services").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: ConnectionState::Discovered,
                ..
            }
        ));
        assert!(status.ensure_disconnectable().is_err());
    }
}
