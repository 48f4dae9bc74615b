use crate::error::HostUsbError;
use crate::types::{ControllerSpeed, DeviceHandle, HostTransfer, TransferCompletion, TransferTicket};

/// Delivers one transfer's outcome. Adapters call this from whatever
/// thread the host stack hands completions back on; implementations must
/// not assume it runs on the submitting thread.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, completion: TransferCompletion);
}

impl<F> CompletionSink for F
where
    F: Fn(TransferCompletion) + Send + Sync,
{
    fn complete(&self, completion: TransferCompletion) {
        self(completion)
    }
}

/// The boundary between the dispatch engine and the host's own USB stack.
/// Every method here corresponds to one libusb/usbfs-equivalent primitive;
/// an adapter wraps whatever the host actually exposes.
///
/// `open` must acquire the device lock, take the handle's owning
/// reference, and release the lock before returning, in that order: the
/// bus-lookup reference used to find the device is never held across the
/// return, so a racing `reenumerate` cannot observe a handle that both the
/// old and new caller believe they own.
pub trait HostUsbAdapter: Send + Sync {
    fn open(&self, bus: u32, device: u32) -> Result<DeviceHandle, HostUsbError>;

    fn close(&self, handle: DeviceHandle);

    /// Sets the active configuration. Idempotent: setting the
    /// already-active value is a no-op, not a bus reset.
    fn set_configuration(&self, handle: DeviceHandle, value: u8) -> Result<(), HostUsbError>;

    /// Cancels every in-flight transfer queued on one endpoint, waiting
    /// for them to drain before returning.
    fn flush_endpoint(&self, handle: DeviceHandle, endpoint: u8) -> Result<(), HostUsbError>;

    /// Selects an alternate setting on one interface. Backs the
    /// backend-synthesized handling of `SET_INTERFACE` control requests.
    fn set_interface(&self, handle: DeviceHandle, interface: u8, alternate: u8) -> Result<(), HostUsbError>;

    /// Clears a halted endpoint's stall condition. Backs the
    /// backend-synthesized handling of `CLEAR_FEATURE(ENDPOINT_HALT)`.
    /// A pipe already clear is not an error.
    fn clear_halt(&self, handle: DeviceHandle, endpoint: u8) -> Result<(), HostUsbError>;

    fn running(&self, handle: DeviceHandle) -> Result<bool, HostUsbError>;

    fn controller_speed(&self, handle: DeviceHandle) -> Result<ControllerSpeed, HostUsbError>;

    /// Forces the host stack to re-read the device's descriptors, as
    /// happens after a reset. Returns whether the device is still present
    /// afterward.
    fn reenumerate(&self, handle: DeviceHandle) -> Result<bool, HostUsbError>;

    /// Submits one transfer. `sink` receives exactly one [`TransferCompletion`]
    /// for the returned ticket, even if the transfer is later cancelled.
    fn submit(
        &self,
        handle: DeviceHandle,
        transfer: HostTransfer,
        sink: std::sync::Arc<dyn CompletionSink>,
    ) -> Result<TransferTicket, HostUsbError>;

    /// Requests cancellation of one outstanding transfer. Completion still
    /// arrives asynchronously via the sink passed to `submit`, with
    /// `HostStatus::Cancelled` (or whatever status the host stack had
    /// already committed to before the cancel was noticed).
    fn cancel(&self, handle: DeviceHandle, ticket: TransferTicket);
}
