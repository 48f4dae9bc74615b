//! The host USB adapter contract: the thin boundary between the dispatch
//! engine and whatever the host itself exposes for talking to real USB
//! devices (libusb, usbfs, a kernel driver's own ioctls). Everything
//! upstream of this crate works purely in terms of [`HostUsbAdapter`] and
//! never assumes a particular host stack.

mod adapter;
mod error;
mod sim;
mod status;
mod types;

pub use adapter::{CompletionSink, HostUsbAdapter};
pub use error::HostUsbError;
pub use sim::SimHost;
pub use status::to_wire_status;
pub use types::{
    ControllerSpeed, DeviceHandle, HostStatus, HostTransfer, IsoPacketRequest, IsoPacketResult,
    Pipe, TransferBuffer, TransferCompletion, TransferTicket,
};
