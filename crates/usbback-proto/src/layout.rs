//! Byte layouts for the three on-wire ring protocols.
//!
//! The frontend and backend negotiate one of `Native`, `X86_32` or `X86_64`
//! over the configuration store's `protocol` key (see
//! `usbback-worker`'s lifecycle driver). The three differ only in how much
//! padding sits between the fixed header and the grant-reference segment
//! array, mirroring the alignment a 32-bit vs. 64-bit guest compiler would
//! insert into the equivalent C struct. Everything else about the record is
//! identical, which is why a single generic codec parameterized by
//! [`Protocol::header_len`] implements all three rather than three
//! hand-duplicated encoders.

use crate::error::ProtoError;
use crate::request::{Direction, Request, Segment, TransferType, MAX_SEGMENTS};
use crate::response::RESPONSE_LEN;
use crate::status::WireStatus;
use crate::Response;

/// Fixed portion of a request record, before the segment array:
/// id(8) + transfer_type(1) + direction(1) + endpoint(1) + flags(1) +
/// nr_packets(2) + start_frame(2) + offset(2) + reserved(2) +
/// transfer_buffer_length(4) + setup(8) + nr_segments(1) + reserved(1).
const REQUEST_HEADER_BASE: usize = 34;

/// Negotiated on-wire protocol variant, selected from the frontend's
/// `protocol` configuration-store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// No `protocol` key, or a value this backend doesn't recognize as
    /// 32/64-bit: assume the frontend's word size matches ours.
    Native,
    X86_32,
    X86_64,
}

impl Protocol {
    pub fn from_store_value(value: Option<&str>) -> Protocol {
        match value {
            Some("x86_32-abi") => Protocol::X86_32,
            Some("x86_64-abi") => Protocol::X86_64,
            _ => Protocol::Native,
        }
    }

    /// Bytes from the start of a request record to the first segment.
    fn segment_pad(self) -> usize {
        match self {
            Protocol::X86_32 => (4 - (REQUEST_HEADER_BASE % 4)) % 4,
            Protocol::Native | Protocol::X86_64 => (8 - (REQUEST_HEADER_BASE % 8)) % 8,
        }
    }

    pub fn request_header_len(self) -> usize {
        REQUEST_HEADER_BASE + self.segment_pad()
    }

    pub fn request_len(self, nr_segments: usize) -> usize {
        self.request_header_len() + nr_segments * 4
    }

    pub fn response_len(self) -> usize {
        RESPONSE_LEN
    }

    pub fn encode_request(self, req: &Request) -> Result<Vec<u8>, ProtoError> {
        if req.segments.len() > MAX_SEGMENTS {
            return Err(ProtoError::TooManySegments(req.segments.len()));
        }
        let mut buf = vec![0u8; self.request_len(req.segments.len())];
        buf[0..8].copy_from_slice(&req.id.to_le_bytes());
        buf[8] = transfer_type_tag(req.transfer_type);
        buf[9] = direction_tag(req.direction);
        buf[10] = req.endpoint;
        buf[11] = (req.asap as u8) | ((req.short_ok as u8) << 1);
        buf[12..14].copy_from_slice(&req.nr_packets.to_le_bytes());
        buf[14..16].copy_from_slice(&req.start_frame.to_le_bytes());
        buf[16..18].copy_from_slice(&req.offset.to_le_bytes());
        buf[20..24].copy_from_slice(&req.transfer_buffer_length.to_le_bytes());
        buf[24..32].copy_from_slice(&req.setup);
        buf[32] = req.segments.len() as u8;

        let seg_base = self.request_header_len();
        for (i, seg) in req.segments.iter().enumerate() {
            let off = seg_base + i * 4;
            buf[off..off + 4].copy_from_slice(&seg.grant_ref.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode_request(self, bytes: &[u8]) -> Result<Request, ProtoError> {
        if bytes.len() < self.request_header_len() {
            return Err(ProtoError::Truncated);
        }
        let id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let transfer_type = transfer_type_from_tag(bytes[8])?;
        let direction = direction_from_tag(bytes[9])?;
        let endpoint = bytes[10];
        let flags = bytes[11];
        let nr_packets = u16::from_le_bytes(bytes[12..14].try_into().unwrap());
        let start_frame = u16::from_le_bytes(bytes[14..16].try_into().unwrap());
        let offset = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
        let transfer_buffer_length = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&bytes[24..32]);
        let nr_segments = bytes[32] as usize;
        if nr_segments > MAX_SEGMENTS {
            return Err(ProtoError::TooManySegments(nr_segments));
        }

        let seg_base = self.request_header_len();
        if bytes.len() < seg_base + nr_segments * 4 {
            return Err(ProtoError::Truncated);
        }
        let mut segments = Vec::with_capacity(nr_segments);
        for i in 0..nr_segments {
            let off = seg_base + i * 4;
            let grant_ref = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            segments.push(Segment { grant_ref });
        }

        Ok(Request {
            id,
            transfer_type,
            direction,
            endpoint,
            setup,
            transfer_buffer_length,
            offset,
            nr_packets,
            start_frame,
            asap: flags & 0x1 != 0,
            short_ok: flags & 0x2 != 0,
            segments,
        })
    }

    pub fn encode_response(self, resp: &Response) -> Vec<u8> {
        crate::response::encode(resp)
    }

    pub fn decode_response(self, bytes: &[u8]) -> Result<Response, ProtoError> {
        crate::response::decode(bytes)
    }
}

fn transfer_type_tag(t: TransferType) -> u8 {
    match t {
        TransferType::Control => 0,
        TransferType::Isochronous => 1,
        TransferType::Bulk => 2,
        TransferType::Interrupt => 3,
    }
}

fn transfer_type_from_tag(tag: u8) -> Result<TransferType, ProtoError> {
    match tag {
        0 => Ok(TransferType::Control),
        1 => Ok(TransferType::Isochronous),
        2 => Ok(TransferType::Bulk),
        3 => Ok(TransferType::Interrupt),
        other => Err(ProtoError::UnknownTransferType(other)),
    }
}

fn direction_tag(d: Direction) -> u8 {
    match d {
        Direction::Out => 0,
        Direction::In => 1,
    }
}

fn direction_from_tag(tag: u8) -> Result<Direction, ProtoError> {
    match tag {
        0 => Ok(Direction::Out),
        1 => Ok(Direction::In),
        other => Err(ProtoError::UnknownDirection(other)),
    }
}

pub(crate) fn status_from_code(code: i32) -> WireStatus {
    match code {
        0 => WireStatus::Ok,
        -32 => WireStatus::Stall,
        -19 => WireStatus::NoDevice,
        -125 => WireStatus::Cancelled,
        -75 => WireStatus::Overflow,
        -22 => WireStatus::InvalidArgument,
        -2 => WireStatus::EndpointNotFound,
        -16 => WireStatus::NotReady,
        _ => WireStatus::Io,
    }
}
