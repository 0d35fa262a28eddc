//! Service discovery example
//!
//! Demonstrates order-independent GATT resolution including:
//! - Finding a peripheral by an advertised service UUID
//! - Connecting and discovering characteristics before their services
//! - Printing the resolved hierarchy
//!
//! The radio is simulated: advertisements and discovery responses are
//! replayed from memory, characteristics interleaved with services.
//!
//! Run with: cargo run --example discover_services

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ble_gatt_peripheral::ble::uuids::{uuid_from_u16, BATTERY_LEVEL_UUID, BATTERY_SERVICE_UUID};
use ble_gatt_peripheral::{
    AdvertisingPacket, BDAddr, CharPropFlags, Characteristic, ConnectionHandle, Controller,
    Error, Peripheral, PeripheralRegistry, Result, Service,
};
use uuid::Uuid;

/// Primary service the target device advertises.
const TARGET_SERVICE: Uuid = uuid_from_u16(0xffa0);

enum Response {
    Service(u16, u16, u16),
    Characteristic(u16, u16, u8),
}

/// Discovery responses in the order a radio might deliver them.
const RESPONSES: &[Response] = &[
    Response::Characteristic(0x2a00, 0x0003, 0x02),
    Response::Characteristic(0xffa1, 0x0023, 0x0a),
    Response::Service(0x1800, 0x0001, 0x0007),
    Response::Characteristic(0x2a19, 0x0013, 0x12),
    Response::Service(0xffa0, 0x0020, 0x002f),
    Response::Characteristic(0xffa2, 0x0026, 0x10),
    Response::Service(0x180f, 0x0010, 0x0015),
    Response::Characteristic(0x2a01, 0x0005, 0x02),
];

/// In-memory stand-in for a radio.
struct SimulatedRadio;

impl SimulatedRadio {
    async fn replay(&self, peripheral: &Peripheral, services: bool, chars: bool) -> Result<()> {
        for response in RESPONSES {
            match *response {
                Response::Service(uuid, start, end) if services => {
                    peripheral.sync_service(Service::with_handles(uuid_from_u16(uuid), start, end)?);
                }
                Response::Characteristic(uuid, handle, props) if chars => {
                    peripheral.sync_characteristic(Characteristic::from_raw_properties(
                        uuid_from_u16(uuid),
                        handle,
                        props,
                    ));
                }
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for SimulatedRadio {
    async fn connect(&self, _peripheral: &Peripheral) -> Result<ConnectionHandle> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(ConnectionHandle(0x0040))
    }

    async fn disconnect(&self, _peripheral: &Peripheral) -> Result<()> {
        Ok(())
    }

    async fn discover_services(&self, peripheral: &Peripheral, _uuids: &[Uuid]) -> Result<()> {
        self.replay(peripheral, true, false).await
    }

    async fn discover_all_services(&self, peripheral: &Peripheral) -> Result<()> {
        self.replay(peripheral, true, false).await
    }

    async fn discover_characteristics(
        &self,
        peripheral: &Peripheral,
        _uuids: &[Uuid],
    ) -> Result<()> {
        self.replay(peripheral, false, true).await
    }

    async fn discover_all_characteristics(&self, peripheral: &Peripheral) -> Result<()> {
        self.replay(peripheral, false, true).await
    }

    async fn update_rssi(&self, peripheral: &Peripheral) -> Result<()> {
        peripheral.handle_rssi_update(-52);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,ble_gatt_peripheral=debug")
        .init();

    println!("GATT Service Discovery");
    println!("======================\n");

    let registry = PeripheralRegistry::new(Arc::new(SimulatedRadio));

    // Raw advertising payloads as a scanner would report them
    let adverts: [(BDAddr, i16, &[u8]); 2] = [
        (
            BDAddr::from([0xc4, 0x7c, 0x8d, 0x01, 0x02, 0x03]),
            -71,
            &[0x02, 0x01, 0x06, 0x03, 0x03, 0x0f, 0x18],
        ),
        (
            BDAddr::from([0xc4, 0x7c, 0x8d, 0x0a, 0x0b, 0x0c]),
            -58,
            &[
                0x02, 0x01, 0x06, 0x03, 0x02, 0xa0, 0xff, 0x06, 0x09, b'M', b'o', b'o', b's', b'h',
            ],
        ),
    ];

    for (address, rssi, raw) in adverts {
        let packets = AdvertisingPacket::parse_all(raw)?;
        registry.handle_advertisement(address, Some(rssi), packets);
    }

    println!("Found {} peripheral(s)", registry.len());

    let peripheral = registry
        .advertising_service(&TARGET_SERVICE)
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidParameter {
            name: "service".to_string(),
            value: TARGET_SERVICE.to_string(),
        })?;

    println!(
        "Connecting to {} ({})...",
        peripheral.local_name().unwrap_or_else(|| "unnamed".to_string()),
        peripheral.address()
    );
    peripheral.connect().await?;

    // Characteristics first: they wait in the pending map until services arrive
    let characteristics = peripheral.discover_all_characteristics().await?;
    println!(
        "Discovered {} characteristics, {} waiting for their service",
        characteristics.len(),
        peripheral.unassigned_characteristics().len()
    );

    let services = peripheral.discover_all_services().await?;
    println!("Discovered {} services\n", services.len());

    if let Some(battery) = peripheral.service(&BATTERY_SERVICE_UUID) {
        if let Some(level) = battery.characteristic(&BATTERY_LEVEL_UUID) {
            println!(
                "Battery level characteristic at {} (notify: {})",
                level.handle,
                level.properties.contains(CharPropFlags::NOTIFY)
            );
        }
    }

    let rssi = peripheral.update_rssi().await?;
    println!("RSSI: {} dBm\n", rssi);

    println!("{}", peripheral);

    peripheral.disconnect().await?;
    registry.shutdown().await?;

    Ok(())
}
