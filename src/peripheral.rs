//! Peripheral struct and methods.
//!
//! Represents one remote BLE peripheral as seen from the central: its
//! advertisement snapshot, signal strength, connection state, and the GATT
//! hierarchy resolved from discovery responses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use btleplug::api::BDAddr;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::advertising::{self, AdvertisingPacket};
use crate::ble::connection::{ConnectionHandle, ConnectionState, ConnectionStatus};
use crate::ble::uuids::display_uuid;
use crate::config::PeripheralConfig;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::gatt::{Characteristic, GattTable, Handle, Placement, Service, ServiceSync};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Notification emitted by a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// The connection state changed.
    ConnectionStateChanged {
        /// State before the change.
        old: ConnectionState,
        /// State after the change.
        new: ConnectionState,
    },
    /// A service was synced.
    ServiceSynced {
        /// The service UUID.
        uuid: Uuid,
        /// Number of pending characteristics it adopted.
        adopted: usize,
    },
    /// A characteristic was synced.
    CharacteristicSynced {
        /// The characteristic handle.
        handle: Handle,
        /// Where it was placed.
        placement: Placement,
    },
    /// A new RSSI value was reported.
    RssiUpdated(i16),
}

/// Mutable state for a peripheral.
struct PeripheralState {
    /// Last known signal strength in dBm.
    rssi: Option<i16>,
    /// Connection state and handle.
    connection: ConnectionStatus,
    /// Resolved services and pending characteristics.
    gatt: GattTable,
    /// Last time the peripheral was heard from.
    last_seen: DateTime<Utc>,
}

/// A caller waiting in `update_rssi`.
struct RssiWaiter {
    id: u64,
    tx: oneshot::Sender<i16>,
}

/// A remote BLE peripheral.
pub struct Peripheral {
    /// Device address.
    address: BDAddr,
    /// Advertisement the peripheral was discovered with.
    advertising_data: Vec<AdvertisingPacket>,
    /// When the peripheral was discovered.
    discovered_at: DateTime<Utc>,
    /// Radio controller.
    controller: Arc<dyn Controller>,
    /// Configuration.
    config: PeripheralConfig,
    /// Internal state.
    state: RwLock<PeripheralState>,
    /// Callers waiting for an RSSI sample, oldest first.
    rssi_waiters: Mutex<VecDeque<RssiWaiter>>,
    /// Event channel.
    event_tx: broadcast::Sender<PeripheralEvent>,
    /// RSSI request ID counter.
    request_counter: AtomicU64,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl Peripheral {
    /// Create a peripheral from a discovered advertisement.
    pub fn new(
        controller: Arc<dyn Controller>,
        address: BDAddr,
        rssi: Option<i16>,
        advertising_data: Vec<AdvertisingPacket>,
    ) -> Self {
        Self::with_config(
            controller,
            address,
            rssi,
            advertising_data,
            PeripheralConfig::default(),
        )
    }

    /// Create a peripheral with a custom configuration.
    pub fn with_config(
        controller: Arc<dyn Controller>,
        address: BDAddr,
        rssi: Option<i16>,
        advertising_data: Vec<AdvertisingPacket>,
        config: PeripheralConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let now = Utc::now();

        Self {
            address,
            advertising_data,
            discovered_at: now,
            controller,
            config,
            state: RwLock::new(PeripheralState {
                rssi,
                connection: ConnectionStatus::default(),
                gatt: GattTable::new(),
                last_seen: now,
            }),
            rssi_waiters: Mutex::new(VecDeque::new()),
            event_tx,
            request_counter: AtomicU64::new(0),
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Identification ===

    /// Get the device address.
    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// Get the advertisement the peripheral was discovered with.
    pub fn advertising_data(&self) -> &[AdvertisingPacket] {
        &self.advertising_data
    }

    /// Service UUIDs listed in the advertisement.
    pub fn advertised_service_uuids(&self) -> Vec<Uuid> {
        advertising::advertised_service_uuids(&self.advertising_data)
    }

    /// Check if the advertisement lists `uuid` as a service.
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.advertised_service_uuids().contains(uuid)
    }

    /// Local name from the advertisement, if present.
    pub fn local_name(&self) -> Option<String> {
        advertising::local_name(&self.advertising_data)
    }

    /// When the peripheral was discovered.
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// Last time the peripheral advertised or reported a sample.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.state.read().last_seen
    }

    /// Get the configuration.
    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Get the connection handle while connected.
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.state.read().connection.handle()
    }

    /// Get the signal strength (RSSI).
    pub fn rssi(&self) -> Option<i16> {
        self.state.read().rssi
    }

    /// Connect to the peripheral.
    ///
    /// Valid from `Discovered` or `Disconnected`. A new connection starts a
    /// new discovery session, so the GATT table is cleared once connected.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` if a connection exists or is in progress (the
    /// controller is not called). Controller failures are returned as-is and
    /// the prior state is restored.
    pub async fn connect(&self) -> Result<()> {
        let prior = self.state.write().connection.begin_connect()?;
        self.emit_state_change(prior, ConnectionState::Connecting);

        info!("Connecting to {}", self.address);

        match self
            .with_timeout("connect", self.controller.connect(self))
            .await
        {
            Ok(handle) => {
                let outcome = {
                    let mut state = self.state.write();
                    match state.connection.state() {
                        ConnectionState::Connecting => {
                            state.connection.mark_connected(handle);
                            state.gatt.clear();
                            Ok(true)
                        }
                        ConnectionState::Connected => Ok(false),
                        other => Err(other),
                    }
                };

                match outcome {
                    Ok(changed) => {
                        if changed {
                            self.emit_state_change(
                                ConnectionState::Connecting,
                                ConnectionState::Connected,
                            );
                        }
                        info!("Connected to {} (handle {})", self.address, handle);
                        Ok(())
                    }
                    Err(state) => {
                        warn!(
                            "Connection to {} completed after it was abandoned ({})",
                            self.address, state
                        );
                        Err(Error::Cancelled {
                            operation: "connect",
                        })
                    }
                }
            }
            Err(e) => {
                if self.state.write().connection.abort_connect(prior) {
                    self.emit_state_change(ConnectionState::Connecting, prior);
                }
                warn!("Connection to {} failed: {}", self.address, e);
                Err(e)
            }
        }
    }

    /// Disconnect from the peripheral.
    ///
    /// Resolved services and characteristics are kept.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless `Connected` or `Connecting`. On a
    /// controller failure the state is left unchanged.
    pub async fn disconnect(&self) -> Result<()> {
        self.state.read().connection.ensure_disconnectable()?;

        info!("Disconnecting from {}", self.address);

        if let Err(e) = self
            .with_timeout("disconnect", self.controller.disconnect(self))
            .await
        {
            warn!("Failed to disconnect from {}: {}", self.address, e);
            return Err(e);
        }

        self.handle_disconnected();
        Ok(())
    }

    // === Discovery ===

    /// Discover the services with the given UUIDs.
    ///
    /// Returns the matching services known once the controller completes,
    /// ordered by start handle.
    ///
    /// # Errors
    ///
    /// `Error::InvalidParameter` for an empty filter, `Error::InvalidState`
    /// unless connected, `Error::Cancelled` if the peripheral disconnects first.
    pub async fn discover_services(&self, uuids: &[Uuid]) -> Result<Vec<Service>> {
        ensure_filter(uuids)?;
        self.run_discovery("discover services", || {
            self.controller.discover_services(self, uuids)
        })
        .await?;

        Ok(self
            .sorted_services()
            .into_iter()
            .filter(|s| uuids.contains(&s.uuid()))
            .collect())
    }

    /// Discover all services.
    ///
    /// Returns every known service ordered by start handle.
    pub async fn discover_all_services(&self) -> Result<Vec<Service>> {
        self.run_discovery("discover all services", || {
            self.controller.discover_all_services(self)
        })
        .await?;

        Ok(self.sorted_services())
    }

    /// Discover the characteristics with the given UUIDs.
    ///
    /// Returns the matching characteristics known once the controller
    /// completes, assigned or pending, ordered by handle.
    pub async fn discover_characteristics(&self, uuids: &[Uuid]) -> Result<Vec<Characteristic>> {
        ensure_filter(uuids)?;
        self.run_discovery("discover characteristics", || {
            self.controller.discover_characteristics(self, uuids)
        })
        .await?;

        Ok(self
            .characteristics()
            .into_iter()
            .filter(|c| uuids.contains(&c.uuid))
            .collect())
    }

    /// Discover all characteristics.
    pub async fn discover_all_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.run_discovery("discover all characteristics", || {
            self.controller.discover_all_characteristics(self)
        })
        .await?;

        Ok(self.characteristics())
    }

    /// Request a fresh RSSI sample and wait for it.
    ///
    /// Each reported sample completes exactly one waiting request, oldest first.
    /// The request and the wait together are bounded by
    /// `PeripheralConfig::rssi_timeout`.
    pub async fn update_rssi(&self) -> Result<i16> {
        let id = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.rssi_waiters.lock().push_back(RssiWaiter { id, tx });

        let request = async {
            self.controller.update_rssi(self).await?;
            rx.await.map_err(|_| Error::Cancelled {
                operation: "update rssi",
            })
        };

        match tokio::time::timeout(self.config.rssi_timeout, request).await {
            Ok(Ok(rssi)) => Ok(rssi),
            Ok(Err(e)) => {
                self.remove_rssi_waiter(id);
                Err(e)
            }
            Err(_) => {
                self.remove_rssi_waiter(id);
                Err(Error::Timeout {
                    operation: "update rssi",
                })
            }
        }
    }

    // === Controller notifications ===

    /// Record a discovered service and adopt pending characteristics it covers.
    pub fn sync_service(&self, service: Service) -> ServiceSync {
        let uuid = service.uuid();
        let outcome = self.state.write().gatt.sync_service(service);

        let _ = self.event_tx.send(PeripheralEvent::ServiceSynced {
            uuid,
            adopted: outcome.adopted.len(),
        });

        outcome
    }

    /// Assign a discovered characteristic to its service, or hold it pending.
    pub fn sync_characteristic(&self, characteristic: Characteristic) -> Placement {
        let handle = characteristic.handle;
        let placement = self.state.write().gatt.sync_characteristic(characteristic);

        let _ = self
            .event_tx
            .send(PeripheralEvent::CharacteristicSynced { handle, placement });

        placement
    }

    /// The controller reports that the link is up.
    ///
    /// Starts a new discovery session unless already connected on `handle`.
    pub fn handle_connected(&self, handle: ConnectionHandle) {
        let old = {
            let mut state = self.state.write();
            if state.connection.state().is_connected()
                && state.connection.handle() == Some(handle)
            {
                return;
            }
            state.gatt.clear();
            state.connection.mark_connected(handle)
        };

        self.emit_state_change(old, ConnectionState::Connected);
    }

    /// The controller reports that the link is down, requested or not.
    ///
    /// Outstanding RSSI requests are cancelled. Discovered data is kept.
    pub fn handle_disconnected(&self) {
        let (old, new) = {
            let mut state = self.state.write();
            let old = state.connection.mark_disconnected();
            (old, state.connection.state())
        };

        self.rssi_waiters.lock().clear();

        if old != new {
            info!("Disconnected from {}", self.address);
            self.emit_state_change(old, new);
        }
    }

    /// The controller reports a new RSSI sample.
    pub fn handle_rssi_update(&self, rssi: i16) {
        {
            let mut state = self.state.write();
            state.rssi = Some(rssi);
            state.last_seen = Utc::now();
        }

        let _ = self.event_tx.send(PeripheralEvent::RssiUpdated(rssi));

        let mut waiters = self.rssi_waiters.lock();
        while let Some(waiter) = waiters.pop_front() {
            if waiter.tx.send(rssi).is_ok() {
                break;
            }
        }
    }

    /// A repeated advertisement was heard.
    pub(crate) fn note_advertisement(&self, rssi: Option<i16>) {
        let mut state = self.state.write();
        if rssi.is_some() {
            state.rssi = rssi;
        }
        state.last_seen = Utc::now();
    }

    // === GATT queries ===

    /// Get a service by UUID.
    pub fn service(&self, uuid: &Uuid) -> Option<Service> {
        self.state.read().gatt.service(uuid).cloned()
    }

    /// All known services by UUID.
    pub fn services(&self) -> HashMap<Uuid, Service> {
        self.state
            .read()
            .gatt
            .services()
            .map(|s| (s.uuid(), s.clone()))
            .collect()
    }

    /// Known services ordered by start handle.
    pub fn sorted_services(&self) -> Vec<Service> {
        self.state
            .read()
            .gatt
            .sorted_services()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Characteristics whose service has not been discovered yet.
    pub fn unassigned_characteristics(&self) -> BTreeMap<Handle, Characteristic> {
        self.state.read().gatt.unassigned().clone()
    }

    /// Every known characteristic, assigned or pending, ordered by handle.
    pub fn characteristics(&self) -> Vec<Characteristic> {
        self.state
            .read()
            .gatt
            .all_characteristics()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Look up a characteristic by handle.
    pub fn characteristic(&self, handle: Handle) -> Option<Characteristic> {
        self.state.read().gatt.characteristic(handle).cloned()
    }

    /// Where the characteristic at `handle` lives, if it is known.
    pub fn placement(&self, handle: Handle) -> Option<Placement> {
        self.state.read().gatt.placement(handle)
    }

    /// The first service by start handle whose range covers `handle`.
    pub fn service_for_handle(&self, handle: Handle) -> Option<Service> {
        self.state
            .read()
            .gatt
            .sorted_services()
            .into_iter()
            .find(|s| s.contains_handle(handle))
            .cloned()
    }

    // === Events ===

    /// Subscribe to peripheral events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for every peripheral event.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(PeripheralEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Event callback lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for connection state changes.
    pub fn on_connection_state_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_event(move |event| {
            if let PeripheralEvent::ConnectionStateChanged { new, .. } = event {
                callback(new);
            }
        })
    }

    // === Diagnostics ===

    /// Snapshot of identity, state, services and RSSI.
    pub fn summary(&self) -> PeripheralSummary {
        let state = self.state.read();

        PeripheralSummary {
            address: self.address.to_string(),
            local_name: self.local_name(),
            state: state.connection.state(),
            rssi: state.rssi,
            services: state
                .gatt
                .sorted_services()
                .into_iter()
                .map(|s| ServiceSummary {
                    uuid: s.uuid(),
                    start_handle: s.start_handle().as_u16(),
                    end_handle: s.end_handle().as_u16(),
                    characteristics: s.sorted_characteristics().iter().map(|c| c.uuid).collect(),
                })
                .collect(),
            unassigned_handles: state.gatt.unassigned().keys().map(|h| h.as_u16()).collect(),
        }
    }

    // === Internal ===

    fn emit_state_change(&self, old: ConnectionState, new: ConnectionState) {
        if old != new {
            debug!("{} connection state changed: {} -> {}", self.address, old, new);
            let _ = self
                .event_tx
                .send(PeripheralEvent::ConnectionStateChanged { old, new });
        }
    }

    fn remove_rssi_waiter(&self, id: u64) {
        self.rssi_waiters.lock().retain(|w| w.id != id);
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| Error::Timeout { operation })?,
            None => request.await,
        }
    }

    /// Run a discovery request, abandoning it if the peripheral disconnects.
    async fn run_discovery<F, Fut>(&self, operation: &'static str, request: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // Subscribe before the state check so a disconnect cannot slip between them.
        let mut events = self.event_tx.subscribe();
        self.state.read().connection.ensure_connected(operation)?;

        debug!("{}: {}", self.address, operation);

        let disconnected = async {
            loop {
                match events.recv().await {
                    Ok(PeripheralEvent::ConnectionStateChanged { new, .. })
                        if !new.is_connected() =>
                    {
                        break
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if !self.is_connected() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => std::future::pending::<()>().await,
                }
            }
        };

        tokio::select! {
            result = self.with_timeout(operation, request()) => result,
            _ = disconnected => {
                warn!(
                    "{} disconnected during {}; keeping {} services discovered so far",
                    self.address,
                    operation,
                    self.state.read().gatt.service_count()
                );
                Err(Error::Cancelled { operation })
            }
        }
    }
}

fn ensure_filter(uuids: &[Uuid]) -> Result<()> {
    if uuids.is_empty() {
        return Err(Error::InvalidParameter {
            name: "uuids".to_string(),
            value: "[]".to_string(),
        });
    }
    Ok(())
}

/// Read-only snapshot of a peripheral for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PeripheralSummary {
    /// Device address.
    pub address: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Connection state.
    pub state: ConnectionState,
    /// Last known RSSI.
    pub rssi: Option<i16>,
    /// Services ordered by start handle.
    pub services: Vec<ServiceSummary>,
    /// Handles of characteristics still pending.
    pub unassigned_handles: Vec<u16>,
}

/// One service within a [`PeripheralSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ServiceSummary {
    /// Service UUID.
    pub uuid: Uuid,
    /// First handle.
    pub start_handle: u16,
    /// Last handle.
    pub end_handle: u16,
    /// Characteristic UUIDs ordered by handle.
    pub characteristics: Vec<Uuid>,
}

impl std::fmt::Display for PeripheralSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(name) = &self.local_name {
            write!(f, " \"{}\"", name)?;
        }
        write!(f, " [{}]", self.state)?;
        match self.rssi {
            Some(rssi) => write!(f, " rssi {} dBm", rssi)?,
            None => write!(f, " rssi unknown")?,
        }
        for service in &self.services {
            write!(
                f,
                "\n  service {} {:#06x}..={:#06x}",
                display_uuid(&service.uuid),
                service.start_handle,
                service.end_handle
            )?;
            for uuid in &service.characteristics {
                write!(f, "\n    characteristic {}", display_uuid(uuid))?;
            }
        }
        if !self.unassigned_handles.is_empty() {
            write!(f, "\n  unassigned {:04x?}", self.unassigned_handles)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.summary(), f)
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Peripheral")
            .field("address", &self.address)
            .field("connection_state", &state.connection.state())
            .field("rssi", &state.rssi)
            .field("services", &state.gatt.service_count())
            .field("unassigned", &state.gatt.pending_count())
            .finish()
    }
}
