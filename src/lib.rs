// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-gatt-peripheral
//!
//! A model of a remote Bluetooth Low Energy peripheral as seen from a
//! central, with order-independent resolution of its GATT hierarchy.
//!
//! Discovery responses from a radio arrive piecemeal and in no fixed order:
//! a characteristic may be reported before the service that contains it.
//! [`Peripheral`] keeps every characteristic either inside the service whose
//! handle range covers it or in a pending map keyed by handle, and moves
//! pending characteristics into a service the moment that service is synced.
//!
//! ## Features
//!
//! - **GATT resolution**: `sync_service` / `sync_characteristic` converge on
//!   the same hierarchy for any interleaving
//! - **Connection state machine**: `Discovered -> Connecting -> Connected -> Disconnected`
//!   with invalid requests rejected before reaching the radio
//! - **Async operations**: connect, disconnect, discovery and RSSI requests
//!   resolve exactly once; discovery is cancelled cleanly by a disconnect
//! - **Typed events**: broadcast channel and callback registration
//! - **Multi-peripheral**: [`PeripheralRegistry`] keeps one independent
//!   peripheral per address
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_gatt_peripheral::{Controller, PeripheralRegistry, Result};
//!
//! async fn run(controller: Arc<dyn Controller>) -> Result<()> {
//!     let registry = PeripheralRegistry::new(controller);
//!     let mut discovered = registry.subscribe_discovered();
//!
//!     // The controller reports advertisements through `handle_advertisement`.
//!     let peripheral = discovered.recv().await.expect("registry alive");
//!
//!     peripheral.connect().await?;
//!     peripheral.discover_all_characteristics().await?;
//!     for service in peripheral.discover_all_services().await? {
//!         println!("{}", service);
//!     }
//!
//!     peripheral.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Implementing a controller
//!
//! The [`Controller`] trait is the only boundary to the radio. While a
//! discovery request is in flight the controller calls
//! [`Peripheral::sync_service`] and [`Peripheral::sync_characteristic`] for
//! each record the radio returns, then resolves the request.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod gatt;
pub mod peripheral;
pub mod registry;

// Re-exports for convenience
pub use config::PeripheralConfig;
pub use controller::Controller;
pub use error::{Error, Result};
pub use peripheral::{CallbackHandle, Peripheral, PeripheralEvent, PeripheralSummary};
pub use registry::PeripheralRegistry;

// Re-export commonly used types from submodules
pub use ble::advertising::{AdType, AdvertisingPacket};
pub use ble::connection::{ConnectionHandle, ConnectionState};
pub use gatt::{Characteristic, GattTable, Handle, HandleRange, Placement, Service, ServiceSync};

// Address and property types come from btleplug so they interoperate with it.
pub use btleplug::api::{BDAddr, CharPropFlags};
