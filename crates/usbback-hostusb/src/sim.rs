use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::adapter::{CompletionSink, HostUsbAdapter};
use crate::error::HostUsbError;
use crate::types::{
    ControllerSpeed, DeviceHandle, HostStatus, HostTransfer, IsoPacketResult, TransferCompletion,
    TransferTicket,
};

struct SimDevice {
    bus: u32,
    device: u32,
    speed: ControllerSpeed,
    configuration: u8,
    running: bool,
    configuration_writes: u64,
}

struct PendingTransfer {
    handle: DeviceHandle,
    sink: Arc<dyn CompletionSink>,
}

/// A deterministic, fully in-memory [`HostUsbAdapter`] for tests. Devices
/// are registered up front with [`SimHost::register`]; transfers queue
/// until the test drives them to completion with [`SimHost::complete`] or
/// [`SimHost::cancel_and_complete`]. Nothing here talks to real hardware or
/// spawns threads, so tests stay deterministic.
pub struct SimHost {
    next_handle: AtomicU64,
    next_ticket: AtomicU64,
    devices: Mutex<HashMap<DeviceHandle, SimDevice>>,
    pending: Mutex<HashMap<TransferTicket, PendingTransfer>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    pub fn new() -> Self {
        SimHost {
            next_handle: AtomicU64::new(1),
            next_ticket: AtomicU64::new(1),
            devices: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a device at `bus.device` with the given speed class,
    /// returning the handle subsequent `open` calls will hand out.
    pub fn register(&self, bus: u32, device: u32, speed: ControllerSpeed) -> DeviceHandle {
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.devices.lock().unwrap().insert(
            handle,
            SimDevice {
                bus,
                device,
                speed,
                configuration: 0,
                running: true,
                configuration_writes: 0,
            },
        );
        handle
    }

    /// Number of times `set_configuration` actually touched the device
    /// (i.e. was called with a value different from the active one).
    /// Lets a test confirm the idempotency contract in
    /// [`HostUsbAdapter::set_configuration`] without observing any real
    /// hardware side effect.
    pub fn configuration_write_count(&self, handle: DeviceHandle) -> u64 {
        self.devices
            .lock()
            .unwrap()
            .get(&handle)
            .map(|d| d.configuration_writes)
            .unwrap_or(0)
    }

    /// Marks a registered device absent, as if it had been unplugged.
    /// Subsequent calls against its handle fail with `NoSuchDevice`.
    pub fn unplug(&self, handle: DeviceHandle) {
        self.devices.lock().unwrap().remove(&handle);
        debug!(?handle, "device unplugged");
    }

    fn device_for(
        &self,
        handle: DeviceHandle,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DeviceHandle, SimDevice>>, HostUsbError> {
        let guard = self.devices.lock().unwrap();
        if guard.contains_key(&handle) {
            Ok(guard)
        } else {
            Err(HostUsbError::Stale)
        }
    }

    /// Delivers a completion for a transfer the test previously submitted,
    /// removing it from the pending set.
    pub fn complete(
        &self,
        ticket: TransferTicket,
        status: HostStatus,
        actual_length: u32,
        iso_results: Vec<IsoPacketResult>,
    ) {
        self.complete_with_data(ticket, status, actual_length, iso_results, None)
    }

    /// Like [`SimHost::complete`] but also supplies the received bytes for
    /// an inbound contiguous-copy transfer.
    pub fn complete_with_data(
        &self,
        ticket: TransferTicket,
        status: HostStatus,
        actual_length: u32,
        iso_results: Vec<IsoPacketResult>,
        data: Option<Vec<u8>>,
    ) {
        let pending = self.pending.lock().unwrap().remove(&ticket);
        if let Some(pending) = pending {
            pending.sink.complete(TransferCompletion {
                ticket,
                status,
                actual_length,
                iso_results,
                data,
            });
        }
    }

    /// True once every transfer submitted against `handle` has a
    /// completion recorded against it and removed from the pending set.
    pub fn all_drained(&self, handle: DeviceHandle) -> bool {
        !self
            .pending
            .lock()
            .unwrap()
            .values()
            .any(|p| p.handle == handle)
    }
}

impl HostUsbAdapter for SimHost {
    fn open(&self, bus: u32, device: u32) -> Result<DeviceHandle, HostUsbError> {
        let devices = self.devices.lock().unwrap();
        devices.iter().find(|(_, d)| d.bus == bus && d.device == device).map(|(handle, _)| *handle).ok_or_else(|| {
            warn!(bus, device, "open failed: no such device");
            HostUsbError::NoSuchDevice { bus, device }
        })
    }

    fn close(&self, _handle: DeviceHandle) {}

    fn set_configuration(&self, handle: DeviceHandle, value: u8) -> Result<(), HostUsbError> {
        let mut devices = self.device_for(handle)?;
        let device = devices.get_mut(&handle).unwrap();
        if device.configuration != value {
            device.configuration = value;
            device.configuration_writes += 1;
        }
        Ok(())
    }

    fn flush_endpoint(&self, handle: DeviceHandle, _endpoint: u8) -> Result<(), HostUsbError> {
        self.device_for(handle)?;
        let tickets: Vec<TransferTicket> = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.handle == handle)
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in tickets {
            self.complete(ticket, HostStatus::Cancelled, 0, Vec::new());
        }
        Ok(())
    }

    fn set_interface(&self, handle: DeviceHandle, _interface: u8, _alternate: u8) -> Result<(), HostUsbError> {
        self.device_for(handle)?;
        Ok(())
    }

    fn clear_halt(&self, handle: DeviceHandle, _endpoint: u8) -> Result<(), HostUsbError> {
        self.device_for(handle)?;
        Ok(())
    }

    fn running(&self, handle: DeviceHandle) -> Result<bool, HostUsbError> {
        Ok(self.device_for(handle)?.get(&handle).unwrap().running)
    }

    fn controller_speed(&self, handle: DeviceHandle) -> Result<ControllerSpeed, HostUsbError> {
        Ok(self.device_for(handle)?.get(&handle).unwrap().speed)
    }

    fn reenumerate(&self, handle: DeviceHandle) -> Result<bool, HostUsbError> {
        Ok(self.devices.lock().unwrap().contains_key(&handle))
    }

    fn submit(
        &self,
        handle: DeviceHandle,
        _transfer: HostTransfer,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<TransferTicket, HostUsbError> {
        self.device_for(handle)?;
        let ticket = TransferTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst));
        self.pending
            .lock()
            .unwrap()
            .insert(ticket, PendingTransfer { handle, sink });
        Ok(ticket)
    }

    fn cancel(&self, _handle: DeviceHandle, ticket: TransferTicket) {
        self.complete(ticket, HostStatus::Cancelled, 0, Vec::new());
    }
}
