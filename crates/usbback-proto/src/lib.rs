//! Wire types and byte layouts for the paravirtualized USB pass-through ring.
//!
//! This crate has no I/O of its own: it only knows how to turn a
//! [`Request`]/[`Response`] into bytes and back, across the three protocol
//! variants a frontend may negotiate (`usbback-worker` owns the ring and the
//! negotiation itself).

pub mod error;
pub mod layout;
pub mod request;
pub mod response;
pub mod status;

pub use error::ProtoError;
pub use layout::Protocol;
pub use request::{Direction, IsoPacketDescriptor, Request, Response, Segment, TransferType, MAX_SEGMENTS};
pub use status::WireStatus;
