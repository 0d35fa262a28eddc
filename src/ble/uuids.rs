//! Bluetooth SIG UUID helpers.
//!
//! 16-bit and 32-bit assigned numbers are shorthand for UUIDs built on the
//! Bluetooth Base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

/// The Bluetooth Base UUID.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

const BASE_LOW_BITS: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;
const SHORT_MASK: u128 = 0xffff_ffff_0000_0000_0000_0000_0000_0000;

/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = uuid_from_u16(0x1800);
/// Generic Attribute service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid = uuid_from_u16(0x1801);
/// Device Information service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180a);
/// Battery service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180f);

/// Device Name characteristic UUID.
pub const DEVICE_NAME_UUID: Uuid = uuid_from_u16(0x2a00);
/// Appearance characteristic UUID.
pub const APPEARANCE_UUID: Uuid = uuid_from_u16(0x2a01);
/// Service Changed characteristic UUID.
pub const SERVICE_CHANGED_UUID: Uuid = uuid_from_u16(0x2a05);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = uuid_from_u16(0x2a19);
/// Manufacturer Name characteristic UUID.
pub const MANUFACTURER_NAME_UUID: Uuid = uuid_from_u16(0x2a29);

/// Expand a 16-bit assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// Expand a 32-bit assigned number into a full UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BASE_LOW_BITS)
}

/// Return the 16-bit short form of `uuid`, if it is built on the Base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_MASK != BASE_LOW_BITS {
        return None;
    }
    u16::try_from(value >> 96).ok()
}

/// Format a UUID the way GATT tools usually print it: short form when possible.
pub fn display_uuid(uuid: &Uuid) -> String {
    match short_uuid(uuid) {
        Some(short) => format!("{:#06x}", short),
        None => uuid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let device_info = DEVICE_INFO_SERVICE_UUID.to_string();
        assert_eq!(device_info, "0000180a-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid_from_u16(0), BLUETOOTH_BASE_UUID);
    }

    #[test]
    fn test_short_uuid_roundtrip() {
        assert_eq!(short_uuid(&BATTERY_LEVEL_UUID), Some(0x2a19));
        assert_eq!(short_uuid(&uuid_from_u16(0xffa0)), Some(0xffa0));
    }

    #[test]
    fn test_short_uuid_rejects_vendor_uuids() {
        let vendor = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert_eq!(short_uuid(&vendor), None);
        // 32-bit assigned numbers have no 16-bit form
        assert_eq!(short_uuid(&uuid_from_u32(0x0001_0000)), None);
    }

    #[test]
    fn test_display_uuid() {
        assert_eq!(display_uuid(&GENERIC_ACCESS_SERVICE_UUID), "0x1800");
        let vendor = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
        assert_eq!(display_uuid(&vendor), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    }
}
