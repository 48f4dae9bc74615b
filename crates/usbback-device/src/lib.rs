//! Device ownership: claiming and releasing a physical device's
//! interfaces, the process-wide `(bus, device) -> owner` map, and the
//! per-connection lifecycle state (in-flight refcount, cancellation flag,
//! statistics) that sits above a [`usbback_hostusb::HostUsbAdapter`].

mod claim;
mod connection;
mod device_map;
mod error;
mod grant;
mod owned_device;

pub use claim::{DeviceClaim, InMemoryTopology, UsbTopology};
pub use connection::{Connection, ResetGuard, Stats};
pub use device_map::DeviceMap;
pub use error::ClaimError;
pub use grant::{GrantMapper, InMemoryGrantMapper};
pub use owned_device::OwnedDevice;

/// Capacity of the process-wide device map, matching `VUSB_MAX_DEVICES`.
pub const DEVICE_MAP_CAPACITY: usize = 512;
