//! Registry of discovered peripherals.
//!
//! Keeps one [`Peripheral`] per device address. The controller (or whatever
//! drives scanning) reports advertisements here; the first advertisement from
//! an address creates its peripheral, later ones only refresh RSSI. A
//! peripheral lives until it is explicitly removed, disconnects included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use btleplug::api::BDAddr;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::advertising::AdvertisingPacket;
use crate::config::PeripheralConfig;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::peripheral::{CallbackHandle, Peripheral};

/// Central registry for discovered peripherals.
pub struct PeripheralRegistry {
    /// Controller handed to every peripheral.
    controller: Arc<dyn Controller>,
    /// Configuration handed to every peripheral.
    config: PeripheralConfig,
    /// Known peripherals by address.
    peripherals: RwLock<HashMap<BDAddr, Arc<Peripheral>>>,
    /// Discovery channel.
    discovered_tx: broadcast::Sender<Arc<Peripheral>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl PeripheralRegistry {
    /// Create an empty registry.
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self::with_config(controller, PeripheralConfig::default())
    }

    /// Create an empty registry whose peripherals use `config`.
    pub fn with_config(controller: Arc<dyn Controller>, config: PeripheralConfig) -> Self {
        let (discovered_tx, _) = broadcast::channel(32);

        Self {
            controller,
            config,
            peripherals: RwLock::new(HashMap::new()),
            discovered_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Report an advertisement.
    ///
    /// Creates the peripheral on first sight and emits a discovery event. For
    /// a known address the advertising snapshot is kept and only RSSI and
    /// last-seen time are refreshed.
    pub fn handle_advertisement(
        &self,
        address: BDAddr,
        rssi: Option<i16>,
        advertising_data: Vec<AdvertisingPacket>,
    ) -> Arc<Peripheral> {
        let (peripheral, is_new) = {
            let mut peripherals = self.peripherals.write();
            match peripherals.get(&address) {
                Some(existing) => {
                    existing.note_advertisement(rssi);
                    (existing.clone(), false)
                }
                None => {
                    let peripheral = Arc::new(Peripheral::with_config(
                        self.controller.clone(),
                        address,
                        rssi,
                        advertising_data,
                        self.config.clone(),
                    ));
                    peripherals.insert(address, peripheral.clone());
                    (peripheral, true)
                }
            }
        };

        if is_new {
            info!("Discovered peripheral {} (rssi {:?})", address, rssi);
            let _ = self.discovered_tx.send(peripheral.clone());
        }

        peripheral
    }

    /// Get a peripheral by address.
    pub fn get(&self, address: &BDAddr) -> Option<Arc<Peripheral>> {
        self.peripherals.read().get(address).cloned()
    }

    /// Get all known peripherals.
    pub fn peripherals(&self) -> HashMap<BDAddr, Arc<Peripheral>> {
        self.peripherals.read().clone()
    }

    /// Get peripherals sorted by signal strength (strongest first).
    pub fn peripherals_by_signal(&self) -> Vec<Arc<Peripheral>> {
        let mut peripherals: Vec<_> = self.peripherals.read().values().cloned().collect();
        peripherals.sort_by_key(|p| std::cmp::Reverse(p.rssi().unwrap_or(i16::MIN)));
        peripherals
    }

    /// Peripherals whose advertisement lists `service`.
    pub fn advertising_service(&self, service: &Uuid) -> Vec<Arc<Peripheral>> {
        self.peripherals
            .read()
            .values()
            .filter(|p| p.advertises_service(service))
            .cloned()
            .collect()
    }

    /// Dispose of a peripheral, disconnecting it first if needed.
    ///
    /// # Errors
    ///
    /// `Error::PeripheralNotFound` for an unknown address. A failed disconnect
    /// is logged and the peripheral is removed anyway.
    pub async fn remove(&self, address: &BDAddr) -> Result<Arc<Peripheral>> {
        let peripheral = self
            .peripherals
            .write()
            .remove(address)
            .ok_or_else(|| Error::PeripheralNotFound {
                address: address.to_string(),
            })?;

        if peripheral.connection_state().can_disconnect() {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Error disconnecting {} during removal: {}", address, e);
            }
        }

        debug!("Removed peripheral {}", address);
        Ok(peripheral)
    }

    /// Get the number of known peripherals.
    pub fn len(&self) -> usize {
        self.peripherals.read().len()
    }

    /// Check if no peripheral is known.
    pub fn is_empty(&self) -> bool {
        self.peripherals.read().is_empty()
    }

    /// Subscribe to discovery of new peripherals.
    pub fn subscribe_discovered(&self) -> broadcast::Receiver<Arc<Peripheral>> {
        self.discovered_tx.subscribe()
    }

    /// Register a callback for newly discovered peripherals.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_peripheral_discovered<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Arc<Peripheral>) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.discovered_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(peripheral) = rx.recv().await {
                callback(peripheral);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Disconnect every peripheral and forget them all.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down peripheral registry");

        let peripherals: Vec<_> = self.peripherals.write().drain().map(|(_, p)| p).collect();

        let results = join_all(
            peripherals
                .iter()
                .filter(|p| p.connection_state().can_disconnect())
                .map(|p| async move { (p.address(), p.disconnect().await) }),
        )
        .await;

        for (address, result) in results {
            if let Err(e) = result {
                warn!("Error disconnecting {}: {}", address, e);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for PeripheralRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralRegistry")
            .field("peripherals", &self.len())
            .finish()
    }
}
