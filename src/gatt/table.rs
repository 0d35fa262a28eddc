//! Service/characteristic resolution.
//!
//! Discovery responses arrive in any order: a characteristic may be reported
//! before the service whose range contains it. [`GattTable`] keeps every
//! known characteristic in exactly one place, either inside the service that
//! owns its handle or in a pending map keyed by handle, and moves pending
//! entries into a service as soon as that service is synced.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::gatt::characteristic::Characteristic;
use crate::gatt::handle::Handle;
use crate::gatt::service::Service;

/// Where a synced characteristic ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Assigned to the service with this UUID.
    Assigned(Uuid),
    /// No known service covers the handle yet.
    Pending,
}

impl Placement {
    /// The owning service, if assigned.
    pub fn service(&self) -> Option<Uuid> {
        match self {
            Self::Assigned(uuid) => Some(*uuid),
            Self::Pending => None,
        }
    }
}

/// Outcome of syncing a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSync {
    /// Handles moved out of the pending map into the service.
    pub adopted: Vec<Handle>,
    /// Whether a service with the same UUID was already known.
    pub replaced: bool,
    /// Handles that a replaced service owned but the new range no longer covers.
    pub displaced: Vec<Handle>,
}

/// Services of one peripheral plus characteristics awaiting their service.
#[derive(Debug, Clone, Default)]
pub struct GattTable {
    services: HashMap<Uuid, Service>,
    /// UUIDs in first-seen order; breaks start-handle ties when sorting.
    discovery_order: Vec<Uuid>,
    unassigned: BTreeMap<Handle, Characteristic>,
}

impl GattTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered service and adopt any pending characteristics it covers.
    ///
    /// Re-syncing a known UUID replaces the service but carries over the
    /// characteristics already assigned to it, so repeated discovery does not
    /// lose anything.
    pub fn sync_service(&mut self, mut service: Service) -> ServiceSync {
        let uuid = service.uuid();
        let range = service.range();
        let mut outcome = ServiceSync::default();

        let mut overlapped = Vec::new();
        for other in self.services.values() {
            if other.uuid() != uuid && other.range().overlaps(&range) {
                overlapped.push((other.uuid(), other.range()));
                warn!(
                    "Service {} range {} overlaps service {} range {}; first match by start handle wins",
                    uuid,
                    range,
                    other.uuid(),
                    other.range()
                );
            }
        }

        let mut displaced = Vec::new();
        match self.services.remove(&uuid) {
            Some(mut previous) => {
                outcome.replaced = true;
                for (_, characteristic) in previous.take_characteristics() {
                    if !service.contains_handle(characteristic.handle) {
                        warn!(
                            "Service {} re-synced with range {} (was {}); characteristic {} no longer covered",
                            uuid,
                            range,
                            previous.range(),
                            characteristic
                        );
                        displaced.push(characteristic);
                    } else if !service.has_characteristic(&characteristic.uuid)
                        && service.characteristic_by_handle(characteristic.handle).is_none()
                    {
                        service.insert_characteristic(characteristic);
                    }
                }
            }
            None => self.discovery_order.push(uuid),
        }

        let covered: Vec<Handle> = self
            .unassigned
            .range(range.start()..=range.end())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in covered {
            if let Some(characteristic) = self.unassigned.remove(&handle) {
                trace!("Adopting pending characteristic {} into {}", characteristic, uuid);
                service.insert_characteristic(characteristic);
                outcome.adopted.push(handle);
            }
        }

        debug!(
            "Synced service {} [{}]: adopted {} pending characteristics",
            uuid,
            range,
            outcome.adopted.len()
        );

        self.services.insert(uuid, service);

        // Characteristics in the shared part of overlapping ranges are
        // re-placed so the first service by start handle owns them, whichever
        // arrived first.
        if !overlapped.is_empty() {
            let mut contested = Vec::new();
            for (other, _) in &overlapped {
                if let Some(s) = self.services.get_mut(other) {
                    contested.extend(s.remove_characteristics_in(|h| range.contains(h)));
                }
            }
            if let Some(s) = self.services.get_mut(&uuid) {
                contested.extend(
                    s.remove_characteristics_in(|h| overlapped.iter().any(|(_, r)| r.contains(h))),
                );
            }
            contested.sort_by_key(|c| c.handle);
            for characteristic in contested {
                self.sync_characteristic(characteristic);
            }
        }

        for characteristic in displaced {
            outcome.displaced.push(characteristic.handle);
            self.sync_characteristic(characteristic);
        }

        outcome
    }

    /// Assign a discovered characteristic to the service covering its handle,
    /// or hold it as pending.
    ///
    /// Services are scanned by ascending start handle and the first match wins.
    pub fn sync_characteristic(&mut self, characteristic: Characteristic) -> Placement {
        let handle = characteristic.handle;

        let mut matches = self
            .sorted_services()
            .into_iter()
            .filter(|s| s.contains_handle(handle))
            .map(|s| s.uuid());
        let first = matches.next();
        let extra: Vec<Uuid> = matches.collect();

        let owner = match first {
            Some(owner) => owner,
            None => {
                trace!("No service covers {}, holding as pending", characteristic);
                self.unassigned.insert(handle, characteristic);
                return Placement::Pending;
            }
        };

        if !extra.is_empty() {
            warn!(
                "Characteristic {} matches {} services; assigning to {} and ignoring {:?}",
                characteristic,
                extra.len() + 1,
                owner,
                extra
            );
        }

        // A pending entry at this handle is superseded by the assignment.
        self.unassigned.remove(&handle);

        if let Some(service) = self.services.get_mut(&owner) {
            trace!("Assigning {} to service {}", characteristic, owner);
            service.insert_characteristic(characteristic);
        }

        Placement::Assigned(owner)
    }

    /// Get a service by UUID.
    pub fn service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.get(uuid)
    }

    /// Iterate over services in no particular order.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// Services ordered by start handle; ties keep discovery order.
    pub fn sorted_services(&self) -> Vec<&Service> {
        let mut sorted: Vec<&Service> = self
            .discovery_order
            .iter()
            .filter_map(|uuid| self.services.get(uuid))
            .collect();
        sorted.sort_by_key(|s| s.start_handle());
        sorted
    }

    /// Characteristics not yet assigned to a service, keyed by handle.
    pub fn unassigned(&self) -> &BTreeMap<Handle, Characteristic> {
        &self.unassigned
    }

    /// Where the characteristic at `handle` currently lives, if known.
    pub fn placement(&self, handle: Handle) -> Option<Placement> {
        if self.unassigned.contains_key(&handle) {
            return Some(Placement::Pending);
        }
        self.services
            .values()
            .find(|s| s.characteristic_by_handle(handle).is_some())
            .map(|s| Placement::Assigned(s.uuid()))
    }

    /// Look up any known characteristic by handle, assigned or pending.
    pub fn characteristic(&self, handle: Handle) -> Option<&Characteristic> {
        self.unassigned.get(&handle).or_else(|| {
            self.services
                .values()
                .find_map(|s| s.characteristic_by_handle(handle))
        })
    }

    /// Every known characteristic, assigned or pending, ordered by handle.
    pub fn all_characteristics(&self) -> Vec<&Characteristic> {
        let mut all: Vec<&Characteristic> = self
            .services
            .values()
            .flat_map(|s| s.characteristics())
            .chain(self.unassigned.values())
            .collect();
        all.sort_by_key(|c| c.handle);
        all
    }

    /// Number of known services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Number of pending characteristics.
    pub fn pending_count(&self) -> usize {
        self.unassigned.len()
    }

    /// True if nothing has been discovered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.unassigned.is_empty()
    }

    /// Forget all services and characteristics.
    pub fn clear(&mut self) {
        self.services.clear();
        self.discovery_order.clear();
        self.unassigned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::uuid_from_u16;
    use btleplug::api::CharPropFlags;

    fn service_a() -> Service {
        Service::with_handles(uuid_from_u16(0xaaaa), 1, 10).unwrap()
    }

    fn service_b() -> Service {
        Service::with_handles(uuid_from_u16(0xbbbb), 11, 20).unwrap()
    }

    fn chr(short: u16, handle: u16) -> Characteristic {
        Characteristic::new(uuid_from_u16(short), handle, CharPropFlags::READ)
    }

    #[test]
    fn test_characteristic_before_service_is_adopted() {
        let mut table = GattTable::new();

        assert_eq!(table.sync_characteristic(chr(0x2a00, 5)), Placement::Pending);
        assert!(table.unassigned().contains_key(&Handle(5)));

        let outcome = table.sync_service(service_a());
        assert_eq!(outcome.adopted, vec![Handle(5)]);
        assert!(!outcome.replaced);
        assert!(table.unassigned().is_empty());
        assert!(table
            .service(&uuid_from_u16(0xaaaa))
            .unwrap()
            .has_characteristic(&uuid_from_u16(0x2a00)));
    }

    #[test]
    fn test_characteristic_after_services_is_assigned_immediately() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_service(service_b());

        let placement = table.sync_characteristic(chr(0x2a01, 15));
        assert_eq!(placement, Placement::Assigned(uuid_from_u16(0xbbbb)));
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_uncovered_characteristic_stays_pending() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_service(service_b());

        assert_eq!(table.sync_characteristic(chr(0x2a02, 99)), Placement::Pending);
        assert_eq!(table.placement(Handle(99)), Some(Placement::Pending));
        assert_eq!(table.characteristic(Handle(99)).unwrap().handle, Handle(99));
    }

    #[test]
    fn test_adoption_only_takes_covered_handles() {
        let mut table = GattTable::new();
        table.sync_characteristic(chr(0x2a00, 3));
        table.sync_characteristic(chr(0x2a01, 12));
        table.sync_characteristic(chr(0x2a02, 99));

        let outcome = table.sync_service(service_b());
        assert_eq!(outcome.adopted, vec![Handle(12)]);

        let pending: Vec<_> = table.unassigned().keys().copied().collect();
        assert_eq!(pending, vec![Handle(3), Handle(99)]);
    }

    #[test]
    fn test_resync_same_service_keeps_characteristics() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a00, 2));
        table.sync_characteristic(chr(0x2a01, 4));

        let outcome = table.sync_service(service_a());
        assert!(outcome.replaced);
        assert!(outcome.displaced.is_empty());

        let service = table.service(&uuid_from_u16(0xaaaa)).unwrap();
        assert_eq!(service.characteristic_count(), 2);
        assert_eq!(table.service_count(), 1);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_resync_with_shrunk_range_displaces_characteristics() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a00, 2));
        table.sync_characteristic(chr(0x2a01, 9));

        let shrunk = Service::with_handles(uuid_from_u16(0xaaaa), 1, 5).unwrap();
        let outcome = table.sync_service(shrunk);
        assert_eq!(outcome.displaced, vec![Handle(9)]);
        assert_eq!(table.placement(Handle(9)), Some(Placement::Pending));
        assert_eq!(
            table.placement(Handle(2)),
            Some(Placement::Assigned(uuid_from_u16(0xaaaa)))
        );
    }

    #[test]
    fn test_overlapping_ranges_first_by_start_wins() {
        let mut table = GattTable::new();
        let wide = Service::with_handles(uuid_from_u16(0xcccc), 5, 30).unwrap();
        table.sync_service(wide);
        table.sync_service(service_a());

        let placement = table.sync_characteristic(chr(0x2a00, 7));
        assert_eq!(placement, Placement::Assigned(uuid_from_u16(0xaaaa)));
    }

    #[test]
    fn test_overlap_resolution_independent_of_order() {
        let wide = || Service::with_handles(uuid_from_u16(0xcccc), 5, 30).unwrap();

        // Characteristic first: adopted by the wide service, then re-placed
        let mut table = GattTable::new();
        table.sync_characteristic(chr(0x2a00, 7));
        table.sync_characteristic(chr(0x2a01, 25));
        assert_eq!(table.sync_service(wide()).adopted, vec![Handle(7), Handle(25)]);
        table.sync_service(service_a());

        assert_eq!(
            table.placement(Handle(7)),
            Some(Placement::Assigned(uuid_from_u16(0xaaaa)))
        );
        assert_eq!(
            table.placement(Handle(25)),
            Some(Placement::Assigned(uuid_from_u16(0xcccc)))
        );
        assert!(!table
            .service(&uuid_from_u16(0xcccc))
            .unwrap()
            .has_characteristic(&uuid_from_u16(0x2a00)));

        // Same records, services first
        let mut ordered = GattTable::new();
        ordered.sync_service(wide());
        ordered.sync_service(service_a());
        ordered.sync_characteristic(chr(0x2a00, 7));
        ordered.sync_characteristic(chr(0x2a01, 25));

        for handle in [Handle(7), Handle(25)] {
            assert_eq!(table.placement(handle), ordered.placement(handle));
        }
    }

    #[test]
    fn test_earlier_service_keeps_overlap_when_later_one_arrives() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a00, 7));

        let wide = Service::with_handles(uuid_from_u16(0xcccc), 5, 30).unwrap();
        table.sync_service(wide);

        assert_eq!(
            table.placement(Handle(7)),
            Some(Placement::Assigned(uuid_from_u16(0xaaaa)))
        );
        assert_eq!(
            table
                .service(&uuid_from_u16(0xcccc))
                .unwrap()
                .characteristic_count(),
            0
        );
    }

    #[test]
    fn test_sorted_services_ties_keep_discovery_order() {
        let mut table = GattTable::new();
        let first = Service::with_handles(uuid_from_u16(0x0001), 5, 6).unwrap();
        let second = Service::with_handles(uuid_from_u16(0x0002), 5, 8).unwrap();
        let earlier = Service::with_handles(uuid_from_u16(0x0003), 1, 4).unwrap();
        table.sync_service(first);
        table.sync_service(second);
        table.sync_service(earlier);

        let order: Vec<_> = table.sorted_services().iter().map(|s| s.uuid()).collect();
        assert_eq!(
            order,
            vec![uuid_from_u16(0x0003), uuid_from_u16(0x0001), uuid_from_u16(0x0002)]
        );
    }

    #[test]
    fn test_handle_reused_with_new_uuid_replaces_entry() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a00, 3));
        table.sync_characteristic(chr(0x2a01, 3));

        let service = table.service(&uuid_from_u16(0xaaaa)).unwrap();
        assert_eq!(service.characteristic_count(), 1);
        assert!(service.has_characteristic(&uuid_from_u16(0x2a01)));
    }

    #[test]
    fn test_clear() {
        let mut table = GattTable::new();
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a00, 50));
        assert!(!table.is_empty());

        table.clear();
        assert!(table.is_empty());
        assert!(table.sorted_services().is_empty());
    }

    #[test]
    fn test_all_characteristics_sorted() {
        let mut table = GattTable::new();
        table.sync_characteristic(chr(0x2a00, 14));
        table.sync_service(service_a());
        table.sync_characteristic(chr(0x2a01, 2));

        let handles: Vec<_> = table.all_characteristics().iter().map(|c| c.handle).collect();
        assert_eq!(handles, vec![Handle(2), Handle(14)]);
    }
}
