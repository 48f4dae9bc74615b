//! The probe/connect/disconnect handshake with the guest, driven over the
//! configuration store's key/value tree. Ring mapping, event channel
//! binding, and the configuration-store transaction primitive are all host
//! infrastructure this crate has no view of; each is a trait seam here,
//! mirroring the `GrantMapper`/`UsbTopology` pattern used elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use usbback_device::{Connection, DeviceMap, GrantMapper, OwnedDevice, UsbTopology};
use usbback_hostusb::HostUsbAdapter;
use usbback_ring::BackRing;

use crate::error::LifecycleError;

/// The standard five-state handshake plus `Unknown`, the value read back
/// for a node that has not yet been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unknown,
    InitWait,
    Initialised,
    Connected,
    Closing,
    Closed,
}

/// The configuration-store seam: a watched key/value tree shared between
/// frontend and backend. `write_transaction` backs the feature-bit commit,
/// which must land atomically alongside the state transition.
pub trait ConfigStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str);
    fn write_transaction(&self, writes: &[(&str, &str)]) {
        for (key, value) in writes {
            self.write(key, value);
        }
    }
}

/// A deterministic in-memory [`ConfigStore`] for tests, with no watch
/// plumbing of its own: tests drive transitions by writing a key, then
/// calling the relevant [`LifecycleDriver`] method to make it observe the
/// change, the same way a real watch callback would.
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
    }
}

/// Maps the frontend-granted ring page into backend-accessible memory.
/// The grant-mapping hypercall itself is out of scope; this is the seam a
/// real backend plugs it into.
pub trait RingMapper: Send + Sync {
    fn map_ring(&self, grant_ref: u32) -> Result<Vec<u8>, LifecycleError>;
    fn unmap_ring(&self, grant_ref: u32, page: Vec<u8>);
}

/// A deterministic in-memory [`RingMapper`] for tests: grant refs are keys
/// into a page table the test populates up front, same convention as
/// [`usbback_device::InMemoryGrantMapper`].
#[derive(Default)]
pub struct InMemoryRingMapper {
    pages: Mutex<HashMap<u32, Vec<u8>>>,
}

impl InMemoryRingMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, grant_ref: u32, page: Vec<u8>) {
        self.pages.lock().unwrap().insert(grant_ref, page);
    }
}

impl RingMapper for InMemoryRingMapper {
    fn map_ring(&self, grant_ref: u32) -> Result<Vec<u8>, LifecycleError> {
        self.pages
            .lock()
            .unwrap()
            .get(&grant_ref)
            .cloned()
            .ok_or(LifecycleError::RingMapFailed)
    }

    fn unmap_ring(&self, grant_ref: u32, page: Vec<u8>) {
        self.pages.lock().unwrap().insert(grant_ref, page);
    }
}

/// Binds/unbinds the inter-domain event channel used to notify the guest.
/// A real implementation wraps the hypervisor's bind-interdomain and
/// notify hypercalls; this crate only needs to sequence it correctly
/// against ring mapping: bind after map, unbind before unmap.
pub trait EventChannelBinder: Send + Sync {
    fn bind(&self, port: u32) -> Result<(), LifecycleError>;
    fn unbind(&self);
}

#[derive(Default)]
pub struct InMemoryEventChannelBinder {
    bound: Mutex<Option<u32>>,
}

impl InMemoryEventChannelBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_port(&self) -> Option<u32> {
        *self.bound.lock().unwrap()
    }
}

impl EventChannelBinder for InMemoryEventChannelBinder {
    fn bind(&self, port: u32) -> Result<(), LifecycleError> {
        *self.bound.lock().unwrap() = Some(port);
        Ok(())
    }

    fn unbind(&self) {
        *self.bound.lock().unwrap() = None;
    }
}

const BACKEND_PROTOCOL_VERSION: &str = "1";

fn parse_bus_device(value: &str) -> Option<(u32, u32)> {
    let (bus, device) = value.split_once('.')?;
    let bus = u32::from_str_radix(bus, 16).ok()?;
    let device = u32::from_str_radix(device, 16).ok()?;
    Some((bus, device))
}

/// Drives one connection's probe/connect/disconnect handshake. Owns the
/// device claim and the mapped ring; does not own the dispatch worker
/// itself (the caller starts/stops that once `connect` hands back a
/// mapped [`BackRing`]).
pub struct LifecycleDriver<S: ConfigStore, R: RingMapper, E: EventChannelBinder> {
    store: S,
    ring_mapper: R,
    event_channel: E,
    host: Arc<dyn HostUsbAdapter>,
    topology: Arc<dyn UsbTopology>,
    grants: Arc<dyn GrantMapper>,
    device_map: Arc<DeviceMap<Arc<OwnedDevice>>>,
    state: Mutex<ConnectionState>,
    owned: Mutex<Option<Arc<OwnedDevice>>>,
    ring_grant_ref: Mutex<Option<u32>>,
    autosuspend: Mutex<bool>,
}

impl<S: ConfigStore, R: RingMapper, E: EventChannelBinder> LifecycleDriver<S, R, E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        ring_mapper: R,
        event_channel: E,
        host: Arc<dyn HostUsbAdapter>,
        topology: Arc<dyn UsbTopology>,
        grants: Arc<dyn GrantMapper>,
        device_map: Arc<DeviceMap<Arc<OwnedDevice>>>,
    ) -> Self {
        LifecycleDriver {
            store,
            ring_mapper,
            event_channel,
            host,
            topology,
            grants,
            device_map,
            state: Mutex::new(ConnectionState::Unknown),
            owned: Mutex::new(None),
            ring_grant_ref: Mutex::new(None),
            autosuspend: Mutex::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// The configuration store this driver watches. Exposed so a caller
    /// driving both ends of the handshake in one process (no separate
    /// guest) can write the frontend's side of the negotiation.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The ring mapper this driver maps grant references through, for the
    /// same reason as [`LifecycleDriver::store`].
    pub fn ring_mapper(&self) -> &R {
        &self.ring_mapper
    }

    fn require(&self, allowed: &[ConnectionState]) -> Result<ConnectionState, LifecycleError> {
        let current = self.state();
        if allowed.contains(&current) {
            Ok(current)
        } else {
            Err(LifecycleError::InvalidTransition { current, from: allowed[0] })
        }
    }

    /// Writes the version stamp and moves to `InitWait`. The first call a
    /// backend makes for a new connection.
    pub fn probe(&self) -> Result<(), LifecycleError> {
        self.require(&[ConnectionState::Unknown])?;
        self.store.write("version", BACKEND_PROTOCOL_VERSION);
        *self.state.lock().unwrap() = ConnectionState::InitWait;
        info!(version = BACKEND_PROTOCOL_VERSION, "probed; waiting for frontend init");
        Ok(())
    }

    /// Reacts to the `physical-device` watch firing: on `0.0`, drops this
    /// connection's reference and forces a reenumeration, releasing the
    /// process-wide record once its last reference goes; on any other
    /// value, looks the `(bus, device)` pair up in the process-wide device
    /// map first, reactivating a released record or adding a reference to
    /// an already-active one rather than unconditionally opening a fresh
    /// handle and claim.
    pub fn on_physical_device_changed(&self) -> Result<(), LifecycleError> {
        let value = self.store.read("physical-device").unwrap_or_else(|| "0.0".to_string());
        let (bus, device) = parse_bus_device(&value).ok_or(LifecycleError::InvalidPhysicalDevice)?;

        if bus == 0 && device == 0 {
            if let Some(owned) = self.owned.lock().unwrap().take() {
                let _ = self.host.reenumerate(owned.handle);
                if owned.release_ref() == 0 {
                    owned.deactivate();
                    owned.release_claim();
                    self.host.close(owned.handle);
                    self.device_map.remove_by_value(&owned);
                }
            }
            debug!("physical-device cleared; released a reference");
            return Ok(());
        }

        if let Some(existing) = self.device_map.find(bus, device) {
            if existing.is_active() {
                let refs = existing.add_ref();
                info!(bus, device, refs, "reference added to an already-active device on reprobe");
            } else {
                existing.reactivate();
                info!(bus, device, "reactivated a released device record on reprobe");
            }
            *self.autosuspend.lock().unwrap() = false;
            *self.owned.lock().unwrap() = Some(existing);
            return Ok(());
        }

        let handle = self.host.open(bus, device).map_err(|_| LifecycleError::InvalidPhysicalDevice)?;
        let owned = Arc::new(OwnedDevice::new(handle, bus, device));
        if owned.claim_all(self.topology.as_ref()).is_err() {
            self.host.close(handle);
            return Err(LifecycleError::InvalidPhysicalDevice);
        }
        if self.device_map.insert(bus, device, owned.clone()).is_err() {
            owned.release_claim();
            self.host.close(handle);
            return Err(LifecycleError::DeviceMapFull);
        }

        *self.autosuspend.lock().unwrap() = false;
        *self.owned.lock().unwrap() = Some(owned);
        info!(bus, device, "claimed physical device");
        Ok(())
    }

    /// Reacts to the frontend declaring `Initialised` or `Connected`:
    /// validates the protocol version, maps the ring, binds the event
    /// channel, and on success commits the feature-barrier transaction and
    /// moves to `Connected`. Returns the mapped ring ready for a
    /// [`crate::dispatch::DispatchWorker`].
    pub fn connect(&self) -> Result<BackRing, LifecycleError> {
        self.require(&[ConnectionState::InitWait, ConnectionState::Initialised])?;

        let frontend_version = self.store.read("frontend/version");
        if frontend_version.as_deref() != Some(BACKEND_PROTOCOL_VERSION) {
            warn!(?frontend_version, "frontend protocol version mismatch");
            return Err(LifecycleError::VersionMismatch);
        }

        let grant_ref: u32 = self
            .store
            .read("frontend/ring-ref")
            .and_then(|v| v.parse().ok())
            .ok_or(LifecycleError::RingMapFailed)?;
        let event_port: u32 = self
            .store
            .read("frontend/event-channel")
            .and_then(|v| v.parse().ok())
            .ok_or(LifecycleError::RingMapFailed)?;
        let protocol = usbback_proto::Protocol::from_store_value(self.store.read("frontend/protocol").as_deref());

        let page = self.ring_mapper.map_ring(grant_ref)?;
        let ring = BackRing::new(protocol, page).map_err(|_| LifecycleError::RingMapFailed)?;
        self.event_channel.bind(event_port)?;
        *self.ring_grant_ref.lock().unwrap() = Some(grant_ref);

        self.store.write_transaction(&[("feature-barrier", "1")]);
        *self.state.lock().unwrap() = ConnectionState::Connected;
        info!(grant_ref, event_port, "ring connected");
        Ok(ring)
    }

    /// Reacts to a write on the frontend's `autosuspend` watch.
    pub fn on_autosuspend_changed(&self) {
        if let Some(value) = self.store.read("frontend/autosuspend") {
            *self.autosuspend.lock().unwrap() = value == "1";
        }
    }

    pub fn autosuspend_enabled(&self) -> bool {
        *self.autosuspend.lock().unwrap()
    }

    /// Reacts to the frontend declaring `Closing`: sets the connection's
    /// cancelling flag and flushes the claimed device so every in-flight
    /// transfer completes `Cancelled` and drains through the normal
    /// completion path, waits for the drain to reach zero, then unbinds
    /// the event channel and unmaps the ring. Never unmaps the ring while
    /// a pending request could still dereference it.
    pub fn disconnect(&self, ring: BackRing, connection: &Connection) -> Result<(), LifecycleError> {
        self.require(&[ConnectionState::Connected])?;
        connection.begin_cancelling();
        if let Some(owned) = self.owned.lock().unwrap().as_ref().cloned() {
            // `SimHost::flush_endpoint` (and any adapter backing it) flushes
            // the whole device's anchor set regardless of which endpoint
            // number is passed, so 0 is as good as any here.
            if let Err(e) = self.host.flush_endpoint(owned.handle, 0) {
                warn!(%e, "flush failed during disconnect");
            }
        }
        connection.wait_until_drained();

        self.event_channel.unbind();
        if let Some(grant_ref) = self.ring_grant_ref.lock().unwrap().take() {
            self.ring_mapper.unmap_ring(grant_ref, ring.into_page());
        }
        *self.state.lock().unwrap() = ConnectionState::Closing;
        info!("ring disconnected");
        Ok(())
    }

    /// Final teardown once the frontend has moved to `Closed` and the
    /// device is offline: drops this connection's reference to the owned
    /// device, releasing its claim and its process-wide record once the
    /// last reference goes, and moves to `Closed`.
    pub fn close(&self) -> Result<(), LifecycleError> {
        self.require(&[ConnectionState::Closing])?;
        if let Some(owned) = self.owned.lock().unwrap().take() {
            if owned.release_ref() == 0 {
                owned.deactivate();
                owned.release_claim();
                self.host.close(owned.handle);
                self.device_map.remove_by_value(&owned);
            }
        }
        *self.state.lock().unwrap() = ConnectionState::Closed;
        info!("connection closed");
        Ok(())
    }

    /// Brackets an external device reset: sets the connection's cancelling
    /// flag and records one reset for the bracket's duration, flushes the
    /// claimed device so anything in flight drains first, then forces the
    /// host to reprobe. The flag clears when the bracket ends, including
    /// on an early return. Returns whether the device is still present
    /// afterward.
    pub fn reset_device(&self, connection: &Connection) -> Result<bool, LifecycleError> {
        self.require(&[ConnectionState::Connected])?;
        let owned = self.owned.lock().unwrap().as_ref().cloned().ok_or(LifecycleError::InvalidPhysicalDevice)?;

        let _guard = connection.begin_reset();
        if let Err(e) = self.host.flush_endpoint(owned.handle, 0) {
            warn!(%e, "flush failed before reset");
        }
        connection.wait_until_drained();
        let present = self.host.reenumerate(owned.handle).map_err(|_| LifecycleError::InvalidPhysicalDevice)?;
        info!(bus = owned.bus, device = owned.device, present, "device reset");
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbback_device::{InMemoryGrantMapper, InMemoryTopology};
    use usbback_hostusb::{ControllerSpeed, SimHost};

    fn driver(
        host: Arc<SimHost>,
    ) -> LifecycleDriver<InMemoryConfigStore, InMemoryRingMapper, InMemoryEventChannelBinder> {
        LifecycleDriver::new(
            InMemoryConfigStore::new(),
            InMemoryRingMapper::new(),
            InMemoryEventChannelBinder::new(),
            host,
            Arc::new(InMemoryTopology::new(vec![(0, vec![0, 1])])),
            Arc::new(InMemoryGrantMapper::new()),
            Arc::new(DeviceMap::new(usbback_device::DEVICE_MAP_CAPACITY)),
        )
    }

    #[test]
    fn probe_writes_the_version_stamp_and_moves_to_init_wait() {
        let host = Arc::new(SimHost::new());
        let driver = driver(host);
        driver.probe().unwrap();
        assert_eq!(driver.state(), ConnectionState::InitWait);
        assert_eq!(driver.store.read("version").unwrap(), "1");
    }

    #[test]
    fn physical_device_watch_claims_the_announced_device() {
        let host = Arc::new(SimHost::new());
        host.register(1, 7, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "1.7");
        driver.on_physical_device_changed().unwrap();
        assert!(driver.owned.lock().unwrap().is_some());
        assert!(driver.device_map.find(1, 7).is_some());
    }

    #[test]
    fn unplug_simulation_releases_the_claim() {
        let host = Arc::new(SimHost::new());
        host.register(1, 7, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "1.7");
        driver.on_physical_device_changed().unwrap();
        driver.store.write("physical-device", "0.0");
        driver.on_physical_device_changed().unwrap();
        assert!(driver.owned.lock().unwrap().is_none());
        assert!(driver.device_map.find(1, 7).is_none());
    }

    #[test]
    fn reprobing_an_active_device_adds_a_reference_instead_of_reclaiming() {
        let host = Arc::new(SimHost::new());
        host.register(1, 7, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "1.7");
        driver.on_physical_device_changed().unwrap();
        let first = driver.owned.lock().unwrap().clone().unwrap();
        assert_eq!(first.refcount(), 1);

        driver.on_physical_device_changed().unwrap();
        let second = driver.owned.lock().unwrap().clone().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.refcount(), 2);
    }

    #[test]
    fn reprobing_a_released_device_reactivates_its_record() {
        let host = Arc::new(SimHost::new());
        host.register(1, 7, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "1.7");
        driver.on_physical_device_changed().unwrap();
        let first = driver.owned.lock().unwrap().clone().unwrap();

        driver.store.write("physical-device", "0.0");
        driver.on_physical_device_changed().unwrap();
        assert!(!first.is_active());
        assert!(driver.device_map.find(1, 7).is_none());

        driver.store.write("physical-device", "1.7");
        driver.on_physical_device_changed().unwrap();
        assert!(driver.device_map.find(1, 7).is_some());
    }

    #[test]
    fn a_second_distinct_device_is_rejected_once_the_map_is_full() {
        let host = Arc::new(SimHost::new());
        host.register(1, 1, ControllerSpeed::High);
        host.register(2, 2, ControllerSpeed::High);
        let driver = LifecycleDriver::new(
            InMemoryConfigStore::new(),
            InMemoryRingMapper::new(),
            InMemoryEventChannelBinder::new(),
            host,
            Arc::new(InMemoryTopology::new(vec![(0, vec![0])])),
            Arc::new(InMemoryGrantMapper::new()),
            Arc::new(DeviceMap::new(1)),
        );
        driver.probe().unwrap();
        driver.store.write("physical-device", "1.1");
        driver.on_physical_device_changed().unwrap();

        driver.store.write("physical-device", "2.2");
        let err = driver.on_physical_device_changed().unwrap_err();
        assert_eq!(err, LifecycleError::DeviceMapFull);
    }

    #[test]
    fn connect_fails_on_a_version_mismatch() {
        let host = Arc::new(SimHost::new());
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("frontend/version", "99");
        let err = driver.connect().unwrap_err();
        assert_eq!(err, LifecycleError::VersionMismatch);
    }

    #[test]
    fn connect_maps_the_ring_and_commits_the_feature_barrier() {
        let host = Arc::new(SimHost::new());
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("frontend/version", "1");
        driver.store.write("frontend/ring-ref", "42");
        driver.store.write("frontend/event-channel", "9");
        driver.ring_mapper.provide(42, vec![0u8; usbback_ring::PAGE_SIZE]);

        let ring = driver.connect().unwrap();
        assert_eq!(driver.state(), ConnectionState::Connected);
        assert_eq!(driver.store.read("feature-barrier").unwrap(), "1");
        assert_eq!(driver.event_channel.bound_port(), Some(9));
        assert!(ring.nr_ents() > 0);
    }

    #[test]
    fn disconnect_then_close_tears_everything_down() {
        let host = Arc::new(SimHost::new());
        host.register(3, 4, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "3.4");
        driver.on_physical_device_changed().unwrap();
        driver.store.write("frontend/version", "1");
        driver.store.write("frontend/ring-ref", "1");
        driver.store.write("frontend/event-channel", "2");
        driver.ring_mapper.provide(1, vec![0u8; usbback_ring::PAGE_SIZE]);
        let ring = driver.connect().unwrap();

        let connection = Connection::new();
        driver.disconnect(ring, &connection).unwrap();
        assert_eq!(driver.state(), ConnectionState::Closing);
        assert_eq!(driver.event_channel.bound_port(), None);

        driver.close().unwrap();
        assert_eq!(driver.state(), ConnectionState::Closed);
        assert!(driver.device_map.find(3, 4).is_none());
    }

    #[test]
    fn disconnect_blocks_until_an_in_flight_reference_is_released() {
        let host = Arc::new(SimHost::new());
        host.register(3, 4, ControllerSpeed::High);
        let driver = Arc::new(driver(host));
        driver.probe().unwrap();
        driver.store.write("physical-device", "3.4");
        driver.on_physical_device_changed().unwrap();
        driver.store.write("frontend/version", "1");
        driver.store.write("frontend/ring-ref", "1");
        driver.store.write("frontend/event-channel", "2");
        driver.ring_mapper.provide(1, vec![0u8; usbback_ring::PAGE_SIZE]);
        let ring = driver.connect().unwrap();

        let connection = Arc::new(Connection::new());
        connection.acquire();

        let disconnecting = {
            let driver = driver.clone();
            let connection = connection.clone();
            std::thread::spawn(move || driver.disconnect(ring, &connection))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(driver.state(), ConnectionState::Connected, "must not unmap while a request is in flight");
        connection.release();

        disconnecting.join().unwrap().unwrap();
        assert_eq!(driver.state(), ConnectionState::Closing);
    }

    #[test]
    fn reset_device_brackets_the_reenumeration_and_records_a_reset() {
        let host = Arc::new(SimHost::new());
        host.register(3, 4, ControllerSpeed::High);
        let driver = driver(host);
        driver.probe().unwrap();
        driver.store.write("physical-device", "3.4");
        driver.on_physical_device_changed().unwrap();
        driver.store.write("frontend/version", "1");
        driver.store.write("frontend/ring-ref", "1");
        driver.store.write("frontend/event-channel", "2");
        driver.ring_mapper.provide(1, vec![0u8; usbback_ring::PAGE_SIZE]);
        driver.connect().unwrap();

        let connection = Connection::new();
        let present = driver.reset_device(&connection).unwrap();
        assert!(present);
        assert!(!connection.is_cancelling());
        assert_eq!(connection.stats.resets(), 1);
    }
}
