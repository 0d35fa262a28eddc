//! GATT characteristic records.

use btleplug::api::CharPropFlags;
use uuid::Uuid;

use crate::ble::uuids::display_uuid;
use crate::gatt::handle::Handle;

/// A characteristic discovered on a remote peripheral.
///
/// `handle` is the characteristic's declaration handle; it decides which
/// service owns the characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Attribute handle.
    pub handle: Handle,
    /// Property flags from the characteristic declaration.
    pub properties: CharPropFlags,
}

impl Characteristic {
    /// Create a new characteristic record.
    pub fn new(uuid: Uuid, handle: u16, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            handle: Handle(handle),
            properties,
        }
    }

    /// Create a record from the raw properties byte of a characteristic declaration.
    pub fn from_raw_properties(uuid: Uuid, handle: u16, properties: u8) -> Self {
        Self::new(uuid, handle, CharPropFlags::from_bits_truncate(properties))
    }

    /// Check if the characteristic can be read.
    pub fn is_readable(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    /// Check if the characteristic accepts writes, with or without response.
    pub fn is_writable(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    }

    /// Check if the characteristic can notify or indicate.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", display_uuid(&self.uuid), self.handle)
    }
}
