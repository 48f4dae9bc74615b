/// Maximum number of guest pages a single request may grant. Chosen to match
/// the largest scatter/gather fan-out a SuperSpeed bulk transfer realistically
/// needs; requests above this are rejected during decode.
pub const MAX_SEGMENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One guest page granted to a request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub grant_ref: u32,
}

/// A decoded ring request, independent of which of the three on-wire layouts
/// it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub transfer_type: TransferType,
    pub direction: Direction,
    pub endpoint: u8,
    /// Raw 8-byte USB control setup packet; meaningful only for `Control`.
    pub setup: [u8; 8],
    pub transfer_buffer_length: u32,
    /// Byte offset of the payload start within `segments[0]` (or, for
    /// isochronous transfers, within `segments[1]`; `segments[0]` holds the
    /// packet descriptor array).
    pub offset: u16,
    /// Number of isochronous packets described in the descriptor page.
    /// Zero for non-isochronous transfers.
    pub nr_packets: u16,
    pub start_frame: u16,
    pub asap: bool,
    pub short_ok: bool,
    pub segments: Vec<Segment>,
}

impl Request {
    pub fn is_isochronous(&self) -> bool {
        matches!(self.transfer_type, TransferType::Isochronous)
    }

    /// Index of the first payload segment: 1 for isochronous transfers
    /// (segment 0 is the descriptor page), 0 otherwise.
    pub fn payload_segment_base(&self) -> usize {
        if self.is_isochronous() {
            1
        } else {
            0
        }
    }
}

/// One per-packet isochronous descriptor, as carried in the descriptor page
/// (segment 0 of an isochronous request) and mirrored back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacketDescriptor {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: i32,
}

/// A decoded ring response, independent of on-wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub id: u64,
    pub status: crate::status::WireStatus,
    pub actual_length: u32,
    pub start_frame: u16,
}
