//! Advertising packet records.
//!
//! A peripheral keeps the advertisement it was discovered with as an ordered
//! list of raw AD structures. Only the structure split and the service UUID
//! lists are interpreted here; everything else is kept as raw bytes.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::uuids::{uuid_from_u16, uuid_from_u32};
use crate::error::{Error, Result};

/// AD type of an advertising structure.
///
/// Values from the Bluetooth Assigned Numbers, "Common Data Types".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdType {
    /// Flags.
    Flags,
    /// Incomplete List of 16-bit Service Class UUIDs.
    IncompleteServiceUuids16,
    /// Complete List of 16-bit Service Class UUIDs.
    CompleteServiceUuids16,
    /// Incomplete List of 32-bit Service Class UUIDs.
    IncompleteServiceUuids32,
    /// Complete List of 32-bit Service Class UUIDs.
    CompleteServiceUuids32,
    /// Incomplete List of 128-bit Service Class UUIDs.
    IncompleteServiceUuids128,
    /// Complete List of 128-bit Service Class UUIDs.
    CompleteServiceUuids128,
    /// Shortened Local Name.
    ShortenedLocalName,
    /// Complete Local Name.
    CompleteLocalName,
    /// Tx Power Level.
    TxPowerLevel,
    /// Service Data - 16-bit UUID.
    ServiceData16,
    /// Manufacturer Specific Data.
    ManufacturerData,
    /// Any other AD type, kept by value.
    Other(u8),
}

impl AdType {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x01 => Self::Flags,
            0x02 => Self::IncompleteServiceUuids16,
            0x03 => Self::CompleteServiceUuids16,
            0x04 => Self::IncompleteServiceUuids32,
            0x05 => Self::CompleteServiceUuids32,
            0x06 => Self::IncompleteServiceUuids128,
            0x07 => Self::CompleteServiceUuids128,
            0x08 => Self::ShortenedLocalName,
            0x09 => Self::CompleteLocalName,
            0x0a => Self::TxPowerLevel,
            0x16 => Self::ServiceData16,
            0xff => Self::ManufacturerData,
            other => Self::Other(other),
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::Flags => 0x01,
            Self::IncompleteServiceUuids16 => 0x02,
            Self::CompleteServiceUuids16 => 0x03,
            Self::IncompleteServiceUuids32 => 0x04,
            Self::CompleteServiceUuids32 => 0x05,
            Self::IncompleteServiceUuids128 => 0x06,
            Self::CompleteServiceUuids128 => 0x07,
            Self::ShortenedLocalName => 0x08,
            Self::CompleteLocalName => 0x09,
            Self::TxPowerLevel => 0x0a,
            Self::ServiceData16 => 0x16,
            Self::ManufacturerData => 0xff,
            Self::Other(value) => *value,
        }
    }

    /// Width in bytes of each UUID in a service UUID list, if this is one.
    fn service_uuid_width(&self) -> Option<usize> {
        match self {
            Self::IncompleteServiceUuids16 | Self::CompleteServiceUuids16 => Some(2),
            Self::IncompleteServiceUuids32 | Self::CompleteServiceUuids32 => Some(4),
            Self::IncompleteServiceUuids128 | Self::CompleteServiceUuids128 => Some(16),
            _ => None,
        }
    }
}

/// One AD structure from an advertisement or scan response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingPacket {
    /// The AD type.
    pub ad_type: AdType,
    /// The payload, without the length and type bytes.
    pub data: Bytes,
}

impl AdvertisingPacket {
    /// Create a packet from a type and payload.
    pub fn new(ad_type: AdType, data: impl Into<Bytes>) -> Self {
        Self {
            ad_type,
            data: data.into(),
        }
    }

    /// Split raw advertising data into its AD structures.
    ///
    /// A zero length byte marks the start of padding and ends parsing.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidData` if a structure runs past the end of `raw`.
    pub fn parse_all(raw: &[u8]) -> Result<Vec<Self>> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset < raw.len() {
            let length = raw[offset] as usize;
            if length == 0 {
                break;
            }

            let end = offset + 1 + length;
            if end > raw.len() {
                return Err(Error::InvalidData {
                    context: format!(
                        "AD structure at offset {} claims {} bytes, only {} remain",
                        offset,
                        length,
                        raw.len() - offset - 1
                    ),
                });
            }

            let ad_type = AdType::from_raw(raw[offset + 1]);
            let data = Bytes::copy_from_slice(&raw[offset + 2..end]);
            packets.push(Self { ad_type, data });

            offset = end;
        }

        Ok(packets)
    }

    /// Service UUIDs listed by this packet. Empty for other AD types.
    ///
    /// A trailing partial UUID is ignored.
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let width = match self.ad_type.service_uuid_width() {
            Some(width) => width,
            None => return Vec::new(),
        };

        self.data
            .chunks_exact(width)
            .map(|chunk| match width {
                2 => uuid_from_u16(u16::from_le_bytes([chunk[0], chunk[1]])),
                4 => uuid_from_u32(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
                _ => {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(chunk);
                    Uuid::from_u128(u128::from_le_bytes(bytes))
                }
            })
            .collect()
    }

    /// Local name carried by this packet, if it is a name structure.
    pub fn local_name(&self) -> Option<String> {
        match self.ad_type {
            AdType::ShortenedLocalName | AdType::CompleteLocalName => {
                Some(String::from_utf8_lossy(&self.data).into_owned())
            }
            _ => None,
        }
    }
}

/// Every service UUID advertised across `packets`, in packet order.
pub fn advertised_service_uuids(packets: &[AdvertisingPacket]) -> Vec<Uuid> {
    packets.iter().flat_map(|p| p.service_uuids()).collect()
}

/// The best local name across `packets`; a complete name beats a shortened one.
pub fn local_name(packets: &[AdvertisingPacket]) -> Option<String> {
    packets
        .iter()
        .find(|p| p.ad_type == AdType::CompleteLocalName)
        .or_else(|| {
            packets
                .iter()
                .find(|p| p.ad_type == AdType::ShortenedLocalName)
        })
        .and_then(|p| p.local_name())
}
