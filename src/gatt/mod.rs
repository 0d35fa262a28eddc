//! GATT object model.
//!
//! Handles, characteristics, services, and the table that resolves which
//! service owns each characteristic as discovery responses stream in.

pub mod characteristic;
pub mod handle;
pub mod service;
pub mod table;

pub use characteristic::Characteristic;
pub use handle::{Handle, HandleRange};
pub use service::Service;
pub use table::{GattTable, Placement, ServiceSync};
