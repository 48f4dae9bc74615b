use std::sync::Mutex;

use tracing::warn;

use crate::error::ClaimError;

struct Slot<V> {
    bus: u32,
    device: u32,
    value: V,
}

/// The process-wide `(bus, device) -> owned device` map. Bounded and
/// guarded by a single lock, matching the original fixed-size array
/// scanned under one spinlock: a new claim either updates the first slot
/// already keyed to `(bus, device)` or takes the first empty slot, then
/// evicts any further slots that happen to carry the same key (a claim
/// replacing a prior one that was never cleanly released). The *scan
/// order* in which duplicates are found is not part of the externally
/// visible contract, only the end state is: at most one entry per
/// `(bus, device)` pair.
pub struct DeviceMap<V> {
    capacity: usize,
    slots: Mutex<Vec<Option<Slot<V>>>>,
}

impl<V: Clone> DeviceMap<V> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        DeviceMap { capacity, slots: Mutex::new(slots) }
    }

    /// Inserts or replaces the owner of `(bus, device)`. Evicts every
    /// other slot already keyed to the same pair.
    pub fn insert(&self, bus: u32, device: u32, value: V) -> Result<(), ClaimError> {
        let mut slots = self.slots.lock().unwrap();
        let mut claimed_at = None;
        for (i, slot) in slots.iter_mut().enumerate() {
            let matches = matches!(slot, Some(s) if s.bus == bus && s.device == device);
            if slot.is_none() || matches {
                *slot = Some(Slot { bus, device, value: value.clone() });
                claimed_at = Some(i);
                break;
            }
        }
        let claimed_at = match claimed_at {
            Some(i) => i,
            None => {
                warn!(bus, device, capacity = self.capacity, "device map full");
                return Err(ClaimError::MapFull);
            }
        };
        for slot in slots[claimed_at + 1..].iter_mut() {
            let dup = matches!(slot, Some(s) if s.bus == bus && s.device == device);
            if dup {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Removes every slot whose value equals `value`, mirroring release
    /// by identity rather than by key (a device is unmapped when it's
    /// freed, not when another claim replaces it).
    pub fn remove_by_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let mut slots = self.slots.lock().unwrap();
        let mut removed = false;
        for slot in slots.iter_mut() {
            if matches!(slot, Some(s) if &s.value == value) {
                *slot = None;
                removed = true;
            }
        }
        removed
    }

    pub fn find(&self, bus: u32, device: u32) -> Option<V> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .find(|s| s.bus == bus && s.device == device)
            .map(|s| s.value.clone())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_none_before_any_insert() {
        let map: DeviceMap<u32> = DeviceMap::new(4);
        assert_eq!(map.find(1, 2), None);
    }

    #[test]
    fn insert_then_find_round_trips() {
        let map = DeviceMap::new(4);
        map.insert(1, 2, "owner-a").unwrap();
        assert_eq!(map.find(1, 2), Some("owner-a"));
    }

    #[test]
    fn a_second_insert_for_the_same_pair_replaces_the_owner() {
        let map = DeviceMap::new(4);
        map.insert(1, 2, "owner-a").unwrap();
        map.insert(1, 2, "owner-b").unwrap();
        assert_eq!(map.find(1, 2), Some("owner-b"));
    }

    #[test]
    fn duplicate_slots_for_the_same_pair_are_evicted_down_to_one() {
        let map: DeviceMap<&str> = DeviceMap::new(4);
        {
            let mut slots = map.slots.lock().unwrap();
            slots[0] = Some(Slot { bus: 1, device: 2, value: "stale" });
            slots[2] = Some(Slot { bus: 1, device: 2, value: "also-stale" });
        }
        map.insert(1, 2, "fresh").unwrap();
        assert_eq!(map.find(1, 2), Some("fresh"));
        let slots = map.slots.lock().unwrap();
        let occupied = slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(occupied, 1);
    }

    #[test]
    fn insert_fails_once_every_slot_is_taken_by_distinct_keys() {
        let map = DeviceMap::new(2);
        map.insert(1, 1, "a").unwrap();
        map.insert(2, 2, "b").unwrap();
        assert_eq!(map.insert(3, 3, "c"), Err(ClaimError::MapFull));
    }

    #[test]
    fn remove_by_value_clears_every_slot_holding_that_owner() {
        let map = DeviceMap::new(4);
        map.insert(1, 1, "owner").unwrap();
        assert!(map.remove_by_value(&"owner"));
        assert_eq!(map.find(1, 1), None);
        assert!(!map.remove_by_value(&"owner"));
    }
}
