use usbback_buffers::GuestPage;
use usbback_hostusb::TransferTicket;
use usbback_proto::{IsoPacketDescriptor, Request};

/// One in-flight transfer: the decoded request, its mapped guest pages
/// (descriptor page first for isochronous, payload pages otherwise), the
/// grant references those pages came from (needed to unmap them on
/// completion), and the host ticket once submitted.
pub struct PendingRequest {
    pub request: Request,
    pub pages: Vec<GuestPage>,
    pub grant_refs: Vec<u32>,
    pub iso_descriptors: Vec<IsoPacketDescriptor>,
    pub ticket: TransferTicket,
}
