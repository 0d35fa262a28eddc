//! BLE link-level types.
//!
//! Advertising records, connection state, and SIG UUID helpers used by
//! peripherals and controllers.

pub mod advertising;
pub mod connection;
pub mod uuids;

pub use advertising::{AdType, AdvertisingPacket};
pub use connection::{ConnectionHandle, ConnectionState};
pub use uuids::*;
