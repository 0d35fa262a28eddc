//! Shared test fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use ble_gatt_peripheral::ble::uuids::uuid_from_u16;
use ble_gatt_peripheral::{
    AdType, AdvertisingPacket, BDAddr, CharPropFlags, Characteristic, ConnectionHandle,
    Controller, Error, Peripheral, PeripheralConfig, Result, Service,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Service A covers handles 1..=10.
pub fn service_a() -> Service {
    Service::with_handles(uuid_from_u16(0xaaaa), 1, 10).unwrap()
}

/// Service B covers handles 11..=20.
pub fn service_b() -> Service {
    Service::with_handles(uuid_from_u16(0xbbbb), 11, 20).unwrap()
}

pub fn chr(short: u16, handle: u16) -> Characteristic {
    Characteristic::new(uuid_from_u16(short), handle, CharPropFlags::READ)
}

pub fn address() -> BDAddr {
    BDAddr::from([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
}

pub fn advertisement() -> Vec<AdvertisingPacket> {
    vec![
        AdvertisingPacket::new(AdType::Flags, vec![0x06]),
        AdvertisingPacket::new(AdType::IncompleteServiceUuids16, vec![0xa0, 0xff]),
    ]
}

/// Discovery record replayed by [`ScriptedController`].
#[derive(Debug, Clone)]
pub enum Record {
    Service(Service),
    Characteristic(Characteristic),
}

/// Controller that replays canned discovery records.
///
/// Service requests replay every record (services and characteristics
/// interleaved as scripted), mimicking a radio that streams responses in
/// arbitrary order. When `stall_after` is set, discovery stops after that
/// many records, signals `midway`, and never completes. With `hold_connect`
/// the connect request signals `midway` and waits for `release`; with
/// `stall_rssi` the RSSI request never completes.
#[derive(Default)]
pub struct ScriptedController {
    pub records: Vec<Record>,
    pub hold_connect: bool,
    pub release: Notify,
    pub stall_rssi: bool,
    pub connect_error: Mutex<Option<String>>,
    pub disconnect_error: Mutex<Option<String>>,
    pub discovery_error: Mutex<Option<String>>,
    pub rssi_reply: Mutex<Option<i16>>,
    pub stall_after: Option<usize>,
    pub midway: Notify,
    pub calls: Mutex<Vec<&'static str>>,
}

impl ScriptedController {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    async fn replay(
        &self,
        operation: &'static str,
        peripheral: &Peripheral,
        keep: impl Fn(&Record) -> bool,
    ) -> Result<()> {
        if let Some(reason) = self.discovery_error.lock().clone() {
            return Err(Error::transport(operation, reason));
        }

        for (i, record) in self.records.iter().filter(|r| keep(*r)).enumerate() {
            if self.stall_after == Some(i) {
                self.midway.notify_one();
                std::future::pending::<()>().await;
            }
            match record.clone() {
                Record::Service(s) => {
                    peripheral.sync_service(s);
                }
                Record::Characteristic(c) => {
                    peripheral.sync_characteristic(c);
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for ScriptedController {
    async fn connect(&self, _peripheral: &Peripheral) -> Result<ConnectionHandle> {
        self.record("connect");
        if self.hold_connect {
            self.midway.notify_one();
            self.release.notified().await;
        }
        match self.connect_error.lock().clone() {
            Some(reason) => Err(Error::transport("connect", reason)),
            None => Ok(ConnectionHandle(0x40)),
        }
    }

    async fn disconnect(&self, _peripheral: &Peripheral) -> Result<()> {
        self.record("disconnect");
        match self.disconnect_error.lock().clone() {
            Some(reason) => Err(Error::transport("disconnect", reason)),
            None => Ok(()),
        }
    }

    async fn discover_services(&self, peripheral: &Peripheral, uuids: &[Uuid]) -> Result<()> {
        self.record("discover_services");
        let uuids = uuids.to_vec();
        self.replay("discover services", peripheral, move |r| match r {
            Record::Service(s) => uuids.contains(&s.uuid()),
            Record::Characteristic(_) => false,
        })
        .await
    }

    async fn discover_all_services(&self, peripheral: &Peripheral) -> Result<()> {
        self.record("discover_all_services");
        self.replay("discover all services", peripheral, |_| true)
            .await
    }

    async fn discover_characteristics(
        &self,
        peripheral: &Peripheral,
        uuids: &[Uuid],
    ) -> Result<()> {
        self.record("discover_characteristics");
        let uuids = uuids.to_vec();
        self.replay("discover characteristics", peripheral, move |r| match r {
            Record::Characteristic(c) => uuids.contains(&c.uuid),
            Record::Service(_) => false,
        })
        .await
    }

    async fn discover_all_characteristics(&self, peripheral: &Peripheral) -> Result<()> {
        self.record("discover_all_characteristics");
        self.replay("discover all characteristics", peripheral, |r| {
            matches!(r, Record::Characteristic(_))
        })
        .await
    }

    async fn update_rssi(&self, peripheral: &Peripheral) -> Result<()> {
        self.record("update_rssi");
        if self.stall_rssi {
            std::future::pending::<()>().await;
        }
        if let Some(rssi) = *self.rssi_reply.lock() {
            peripheral.handle_rssi_update(rssi);
        }
        Ok(())
    }
}

/// A fresh peripheral driven by `controller`.
pub fn peripheral_with(controller: Arc<ScriptedController>) -> Peripheral {
    Peripheral::with_config(
        controller,
        address(),
        Some(-70),
        advertisement(),
        PeripheralConfig::default().with_rssi_timeout(std::time::Duration::from_millis(200)),
    )
}
