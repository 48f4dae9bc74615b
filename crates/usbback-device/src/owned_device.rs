use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use usbback_hostusb::DeviceHandle;

use crate::claim::{DeviceClaim, UsbTopology};
use crate::error::ClaimError;

/// The process-wide record for one physical device a connection has
/// claimed: the host handle, its claimed interfaces, and the
/// active/initialized/refcount bookkeeping a reprobe needs to tell a fresh
/// claim apart from a reactivation of one already on file.
///
/// `active` distinguishes a record still backing a live connection from
/// one whose last reference was released but left on file in the device
/// map; `initted` tracks whether `claim_all` has ever run for this record,
/// so a reactivation doesn't try to reclaim interfaces a fresh claim
/// already holds.
pub struct OwnedDevice {
    pub handle: DeviceHandle,
    pub bus: u32,
    pub device: u32,
    claim: DeviceClaim,
    active: AtomicBool,
    initted: AtomicBool,
    refcount: AtomicU64,
}

impl OwnedDevice {
    pub fn new(handle: DeviceHandle, bus: u32, device: u32) -> Self {
        OwnedDevice {
            handle,
            bus,
            device,
            claim: DeviceClaim::new(),
            active: AtomicBool::new(true),
            initted: AtomicBool::new(false),
            refcount: AtomicU64::new(1),
        }
    }

    /// Claims every interface of every configuration, as on a fresh probe.
    pub fn claim_all(&self, topology: &dyn UsbTopology) -> Result<usize, ClaimError> {
        let claimed = self.claim.claim_all(topology)?;
        self.initted.store(true, Ordering::SeqCst);
        Ok(claimed)
    }

    pub fn release_claim(&self) -> usize {
        self.claim.release_all()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_initted(&self) -> bool {
        self.initted.load(Ordering::SeqCst)
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Adds one reference to an already-active record, as a reprobe does
    /// when the owning connection never released it. Returns the new
    /// count.
    pub fn add_ref(&self) -> u64 {
        self.refcount.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drops one reference. Returns the count remaining; the caller
    /// deactivates the record once it reaches zero.
    pub fn release_ref(&self) -> u64 {
        let prev = self.refcount.fetch_sub(1, Ordering::SeqCst);
        prev.saturating_sub(1)
    }

    /// Reinitializes a released record for reuse on reprobe: one
    /// reference, active again. The interfaces it already claimed are
    /// untouched; the caller only needs to call `claim_all` if
    /// `is_initted` was false going in.
    pub fn reactivate(&self) {
        self.refcount.store(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl PartialEq for OwnedDevice {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for OwnedDevice {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::InMemoryTopology;

    fn topology() -> InMemoryTopology {
        InMemoryTopology::new(vec![(0, vec![0, 1])])
    }

    #[test]
    fn a_fresh_record_starts_active_with_one_reference() {
        let owned = OwnedDevice::new(DeviceHandle(1), 1, 2);
        assert!(owned.is_active());
        assert!(!owned.is_initted());
        assert_eq!(owned.refcount(), 1);
    }

    #[test]
    fn claim_all_marks_the_record_initted() {
        let owned = OwnedDevice::new(DeviceHandle(1), 1, 2);
        owned.claim_all(&topology()).unwrap();
        assert!(owned.is_initted());
    }

    #[test]
    fn add_ref_then_release_ref_returns_to_zero() {
        let owned = OwnedDevice::new(DeviceHandle(1), 1, 2);
        assert_eq!(owned.add_ref(), 2);
        assert_eq!(owned.release_ref(), 1);
        assert_eq!(owned.release_ref(), 0);
    }

    #[test]
    fn reactivate_resets_the_refcount_and_flips_active() {
        let owned = OwnedDevice::new(DeviceHandle(1), 1, 2);
        owned.release_ref();
        owned.deactivate();
        assert!(!owned.is_active());
        owned.reactivate();
        assert!(owned.is_active());
        assert_eq!(owned.refcount(), 1);
    }

    #[test]
    fn equality_is_keyed_on_the_host_handle() {
        let a = OwnedDevice::new(DeviceHandle(9), 1, 2);
        let b = OwnedDevice::new(DeviceHandle(9), 3, 4);
        let c = OwnedDevice::new(DeviceHandle(10), 1, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
