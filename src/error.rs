//! Error types for the ble-gatt-peripheral crate.

use thiserror::Error;

use crate::ble::connection::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The controller failed to complete a requested radio operation.
    ///
    /// The peripheral's state is left unchanged when this is returned.
    #[error("Transport error during {operation}: {reason}")]
    Transport {
        /// The operation that was requested.
        operation: &'static str,
        /// Description of the failure reported by the controller.
        reason: String,
    },

    /// The operation is not valid in the peripheral's current connection state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was rejected.
        operation: &'static str,
        /// The connection state at the time of the request.
        state: ConnectionState,
    },

    /// The operation did not complete within the configured timeout.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The operation was abandoned because the peripheral disconnected.
    #[error("Operation cancelled by disconnect: {operation}")]
    Cancelled {
        /// The operation that was cancelled.
        operation: &'static str,
    },

    /// A handle range was constructed with `start > end`.
    #[error("Invalid handle range: start {start:#06x} > end {end:#06x}")]
    InvalidHandleRange {
        /// The requested start handle.
        start: u16,
        /// The requested end handle.
        end: u16,
    },

    /// A characteristic handle lies outside the range of the service it was added to.
    #[error("Handle {handle:#06x} outside service range {range}")]
    HandleOutOfRange {
        /// The offending handle.
        handle: u16,
        /// The service range, formatted.
        range: String,
    },

    /// Invalid data was received from the radio.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The peripheral with the given address is not known.
    #[error("Peripheral not found: {address}")]
    PeripheralNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Build a transport error for `operation`.
    pub fn transport(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            reason: reason.into(),
        }
    }

    /// Check if this error came from the controller rather than from local validation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
