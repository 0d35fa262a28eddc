//! GATT services.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::ble::uuids::display_uuid;
use crate::error::{Error, Result};
use crate::gatt::characteristic::Characteristic;
use crate::gatt::handle::{Handle, HandleRange};

/// A service discovered on a remote peripheral.
///
/// Owns the characteristics whose handles fall inside its range. The range
/// is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    uuid: Uuid,
    range: HandleRange,
    characteristics: HashMap<Uuid, Characteristic>,
}

impl Service {
    /// Create a service covering `range` with no characteristics.
    pub fn new(uuid: Uuid, range: HandleRange) -> Self {
        Self {
            uuid,
            range,
            characteristics: HashMap::new(),
        }
    }

    /// Create a service from raw start and end handles.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandleRange` if `start > end`.
    pub fn with_handles(uuid: Uuid, start: u16, end: u16) -> Result<Self> {
        Ok(Self::new(uuid, HandleRange::new(start, end)?))
    }

    /// Service UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Handle range covered by this service.
    pub fn range(&self) -> HandleRange {
        self.range
    }

    /// First handle of the service.
    pub fn start_handle(&self) -> Handle {
        self.range.start()
    }

    /// Last handle of the service.
    pub fn end_handle(&self) -> Handle {
        self.range.end()
    }

    /// Check if `handle` belongs to this service.
    #[inline]
    pub fn contains_handle(&self, handle: Handle) -> bool {
        self.range.contains(handle)
    }

    /// Add a characteristic, replacing any previous one with the same UUID.
    ///
    /// Returns the replaced characteristic, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandleOutOfRange` if the characteristic's handle is not
    /// inside this service's range.
    pub fn add_characteristic(
        &mut self,
        characteristic: Characteristic,
    ) -> Result<Option<Characteristic>> {
        if !self.contains_handle(characteristic.handle) {
            return Err(Error::HandleOutOfRange {
                handle: characteristic.handle.as_u16(),
                range: self.range.to_string(),
            });
        }
        Ok(self.insert_characteristic(characteristic))
    }

    /// Insert without the range check. Callers have already matched the handle.
    ///
    /// An entry under a different UUID at the same handle is dropped, so a
    /// handle never appears twice within a service.
    pub(crate) fn insert_characteristic(
        &mut self,
        characteristic: Characteristic,
    ) -> Option<Characteristic> {
        let (uuid, handle) = (characteristic.uuid, characteristic.handle);
        self.characteristics
            .retain(|existing, c| *existing == uuid || c.handle != handle);

        let previous = self.characteristics.insert(uuid, characteristic);
        if let Some(old) = &previous {
            if old.handle != handle {
                warn!(
                    "Service {}: characteristic {} reported again at {}; dropping handle {}",
                    display_uuid(&self.uuid),
                    display_uuid(&uuid),
                    handle,
                    old.handle
                );
            }
        }
        previous
    }

    /// Remove every characteristic whose handle satisfies `pred`.
    pub(crate) fn remove_characteristics_in(
        &mut self,
        pred: impl Fn(Handle) -> bool,
    ) -> Vec<Characteristic> {
        let uuids: Vec<Uuid> = self
            .characteristics
            .values()
            .filter(|c| pred(c.handle))
            .map(|c| c.uuid)
            .collect();
        uuids
            .iter()
            .filter_map(|uuid| self.characteristics.remove(uuid))
            .collect()
    }

    pub(crate) fn take_characteristics(&mut self) -> HashMap<Uuid, Characteristic> {
        std::mem::take(&mut self.characteristics)
    }

    /// Get a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.get(uuid)
    }

    /// Get a characteristic by handle.
    pub fn characteristic_by_handle(&self, handle: Handle) -> Option<&Characteristic> {
        self.characteristics.values().find(|c| c.handle == handle)
    }

    /// Check if a characteristic with this UUID has been assigned.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.contains_key(uuid)
    }

    /// Iterate over the assigned characteristics, in no particular order.
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.characteristics.values()
    }

    /// Assigned characteristics ordered by handle.
    pub fn sorted_characteristics(&self) -> Vec<&Characteristic> {
        let mut chars: Vec<_> = self.characteristics.values().collect();
        chars.sort_by_key(|c| c.handle);
        chars
    }

    /// Number of assigned characteristics.
    pub fn characteristic_count(&self) -> usize {
        self.characteristics.len()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] ({} characteristics)",
            display_uuid(&self.uuid),
            self.range,
            self.characteristics.len()
        )
    }
}
