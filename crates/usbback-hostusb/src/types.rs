use usbback_proto::{Direction, TransferType};

/// Host controller speed class. SuperSpeed is the one value that changes
/// buffer-mapper policy (`usbback-buffers` uses scatter/gather only here)
/// and the device claimer's "unaligned copies required" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSpeed {
    LowFull,
    High,
    Super,
}

impl ControllerSpeed {
    pub fn is_super(self) -> bool {
        matches!(self, ControllerSpeed::Super)
    }
}

/// Opaque handle to a device the adapter has `open`ed. Carries one
/// reference; `HostUsbAdapter::close` drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque handle identifying one submitted transfer, returned by `submit`
/// and used by `cancel` and by the owning device's anchor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferTicket(pub u64);

/// One USB pipe: direction, endpoint number, and transfer type, fully
/// determining which host queue a transfer is submitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipe {
    pub direction: Direction,
    pub endpoint: u8,
    pub transfer_type: TransferType,
}

/// The data a transfer carries to or from the device: either a contiguous
/// coherent buffer (populated for outbound transfers before submission) or
/// a scatter/gather list of guest pages handed to the controller directly.
/// See `usbback-buffers` for how a request's guest pages become one or the
/// other.
#[derive(Debug, Clone)]
pub enum TransferBuffer {
    Copy(Vec<u8>),
    ScatterGather(Vec<(usize, usize)>),
}

impl TransferBuffer {
    pub fn len(&self) -> usize {
        match self {
            TransferBuffer::Copy(buf) => buf.len(),
            TransferBuffer::ScatterGather(segs) => segs.iter().map(|(_, len)| *len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One isochronous packet's requested offset/length within the transfer
/// buffer, submitted alongside the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacketRequest {
    pub offset: u32,
    pub length: u32,
}

/// One isochronous packet's outcome, filled in by the host adapter on
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacketResult {
    pub actual_length: u32,
    pub status: HostStatus,
}

/// The URB-equivalent: everything the host adapter needs to submit one
/// transfer. Constructed by the dispatch worker (`usbback-worker`) from a
/// decoded [`usbback_proto::Request`] plus the buffer mapper's output.
#[derive(Debug, Clone)]
pub struct HostTransfer {
    pub pipe: Pipe,
    pub buffer: TransferBuffer,
    pub transfer_buffer_length: u32,
    pub interval: u16,
    pub start_frame: u16,
    pub asap: bool,
    pub short_not_ok: bool,
    pub iso_packets: Vec<IsoPacketRequest>,
}

/// Host-side completion status, translated from whatever the host USB
/// stack itself reports. `usbback-proto::WireStatus` is the coarser set
/// that actually crosses the ring; `status::to_wire_status` does the
/// translation. A stall on `CLEAR_FEATURE(HALT)` is a special case
/// handled by the caller, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostStatus {
    #[default]
    Ok,
    Stall,
    NoDevice,
    Cancelled,
    Overflow,
    Io,
}

/// Reported back to whoever submitted a transfer, via the `CompletionSink`
/// closure passed to `HostUsbAdapter::submit`.
#[derive(Debug, Clone)]
pub struct TransferCompletion {
    pub ticket: TransferTicket,
    pub status: HostStatus,
    pub actual_length: u32,
    pub iso_results: Vec<IsoPacketResult>,
    /// The received bytes, for an inbound transfer submitted with
    /// `TransferBuffer::Copy`. `None` for outbound transfers and for
    /// scatter/gather transfers, which write directly into the guest's
    /// pages and so have nothing left to copy back.
    pub data: Option<Vec<u8>>,
}
