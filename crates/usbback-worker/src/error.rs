use thiserror::Error;

use usbback_buffers::BufferError;
use usbback_hostusb::HostUsbError;
use usbback_proto::WireStatus;

/// A per-request rejection, carried back to the guest in the response
/// rather than torn down as a connection error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("endpoint {0} not present on this device")]
    NoSuchEndpoint(u8),
    #[error("device is not addressed or configured")]
    NotReady,
    #[error("invalid iso descriptor")]
    InvalidIsoDescriptor,
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl DispatchError {
    /// The wire status a rejected request is reported back with, per the
    /// per-request error taxonomy.
    pub fn to_wire_status(self) -> WireStatus {
        match self {
            DispatchError::NoSuchEndpoint(_) => WireStatus::EndpointNotFound,
            DispatchError::NotReady => WireStatus::NotReady,
            DispatchError::InvalidIsoDescriptor => WireStatus::InvalidArgument,
            DispatchError::Buffer(BufferError::IsoDescriptorOverflow { .. })
            | DispatchError::Buffer(BufferError::TooManyIsoPackets { .. }) => {
                WireStatus::InvalidArgument
            }
            DispatchError::Buffer(BufferError::NoPages) => WireStatus::NotReady,
        }
    }
}

impl From<HostUsbError> for DispatchError {
    fn from(err: HostUsbError) -> Self {
        match err {
            HostUsbError::NoSuchEndpoint(e) => DispatchError::NoSuchEndpoint(e),
            HostUsbError::NotRunning | HostUsbError::Stale | HostUsbError::NoSuchDevice { .. } => {
                DispatchError::NotReady
            }
            HostUsbError::SetConfigurationFailed(_) => DispatchError::NotReady,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("frontend protocol version does not match the backend")]
    VersionMismatch,
    #[error("could not parse the frontend's physical-device key")]
    InvalidPhysicalDevice,
    #[error("ring mapping failed")]
    RingMapFailed,
    #[error("the process-wide device map is full")]
    DeviceMapFull,
    #[error("requested transition from {from:?} is invalid while in {current:?}")]
    InvalidTransition { current: crate::lifecycle::ConnectionState, from: crate::lifecycle::ConnectionState },
}
