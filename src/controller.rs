//! The radio controller boundary.
//!
//! A [`Controller`] owns the transport to the BLE radio. The peripheral calls
//! it to start operations; the controller reports results back by calling the
//! peripheral's inbound methods ([`Peripheral::sync_service`],
//! [`Peripheral::sync_characteristic`], [`Peripheral::handle_rssi_update`],
//! [`Peripheral::handle_disconnected`]) while the request is in flight, and
//! resolves the returned future once the radio reports completion.
//!
//! Failures should be reported as [`Error::Transport`](crate::Error::Transport).

use async_trait::async_trait;
use uuid::Uuid;

use crate::ble::connection::ConnectionHandle;
use crate::error::Result;
use crate::peripheral::Peripheral;

/// Performs radio I/O on behalf of peripherals.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Open a connection. Resolves once the link is up.
    async fn connect(&self, peripheral: &Peripheral) -> Result<ConnectionHandle>;

    /// Close the connection. Resolves once the link is down.
    async fn disconnect(&self, peripheral: &Peripheral) -> Result<()>;

    /// Discover primary services with the given UUIDs, syncing each as it arrives.
    async fn discover_services(&self, peripheral: &Peripheral, uuids: &[Uuid]) -> Result<()>;

    /// Discover all primary services, syncing each as it arrives.
    async fn discover_all_services(&self, peripheral: &Peripheral) -> Result<()>;

    /// Discover characteristics with the given UUIDs, syncing each as it arrives.
    async fn discover_characteristics(&self, peripheral: &Peripheral, uuids: &[Uuid])
        -> Result<()>;

    /// Discover every characteristic, syncing each as it arrives.
    async fn discover_all_characteristics(&self, peripheral: &Peripheral) -> Result<()>;

    /// Request a signal strength sample.
    ///
    /// Resolves once the request is issued; the sample is delivered through
    /// [`Peripheral::handle_rssi_update`].
    async fn update_rssi(&self, peripheral: &Peripheral) -> Result<()>;
}
