//! Marshals data between guest-owned pages (named by a request's grant
//! references) and the buffer shape a [`usbback_hostusb::HostTransfer`]
//! needs: a contiguous copy for controllers that fault on unaligned DMA,
//! or a scatter/gather list for SuperSpeed controllers that don't.

mod error;

use usbback_hostusb::{ControllerSpeed, TransferBuffer};
use usbback_proto::{IsoPacketDescriptor, Request};

pub use error::BufferError;

/// Host page size assumed for every guest grant. Matches the page size
/// the frontend and backend must already agree on to interpret grant
/// references at all.
pub const PAGE_SIZE: usize = 4096;

/// One guest page, already mapped into backend-accessible memory. Mapping
/// the grant reference itself is host infrastructure this crate has no
/// view of.
pub type GuestPage = Vec<u8>;

/// One scatter/gather entry: a page index (into the request's page list)
/// plus the byte range within that page the controller should read or
/// write directly, without an intervening copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub page_index: usize,
    pub offset: usize,
    pub length: usize,
}

fn first_chunk_len(offset: usize, remaining: usize) -> usize {
    let available = PAGE_SIZE - offset;
    if available > remaining {
        remaining
    } else {
        available
    }
}

/// Builds the contiguous host-visible buffer for an OUT transfer (or the
/// destination buffer an IN transfer's completion will later fill) by
/// copying guest pages verbatim. Used for every controller speed except
/// SuperSpeed, which maps the guest pages directly instead.
pub fn copy_out(request: &Request, pages: &[GuestPage]) -> Result<Vec<u8>, BufferError> {
    let base = request.payload_segment_base();
    let mut remaining = request.transfer_buffer_length as usize;
    if remaining == 0 {
        return Ok(Vec::new());
    }
    if pages.len() <= base {
        return Err(BufferError::NoPages);
    }

    let mut out = Vec::with_capacity(remaining);
    let offset = request.offset as usize;
    let len = first_chunk_len(offset, remaining);
    out.extend_from_slice(&pages[base][offset..offset + len]);
    remaining -= len;

    for page in &pages[base + 1..] {
        if remaining == 0 {
            break;
        }
        let len = first_chunk_len(0, remaining);
        out.extend_from_slice(&page[..len]);
        remaining -= len;
    }

    Ok(out)
}

/// Writes a completion's data back into the guest's pages, the inverse of
/// [`copy_out`]. `data` is truncated to `request.transfer_buffer_length`;
/// callers pass the host adapter's reported `actual_length` slice.
pub fn copy_in(request: &Request, pages: &mut [GuestPage], data: &[u8]) -> Result<(), BufferError> {
    let base = request.payload_segment_base();
    if pages.len() <= base {
        return Err(BufferError::NoPages);
    }

    let offset = request.offset as usize;
    let mut remaining = data.len();
    let mut src_pos = 0usize;

    let len = first_chunk_len(offset, remaining);
    pages[base][offset..offset + len].copy_from_slice(&data[src_pos..src_pos + len]);
    src_pos += len;
    remaining -= len;

    for page in pages[base + 1..].iter_mut() {
        if remaining == 0 {
            break;
        }
        let len = first_chunk_len(0, remaining);
        page[..len].copy_from_slice(&data[src_pos..src_pos + len]);
        src_pos += len;
        remaining -= len;
    }

    Ok(())
}

/// Builds the scatter/gather entry list for a SuperSpeed transfer: one
/// entry per guest page, first entry starting at the request's byte
/// offset, every following entry starting at page offset zero.
pub fn setup_scatter_gather(request: &Request, page_count: usize) -> Vec<SgEntry> {
    let base = request.payload_segment_base();
    let mut remaining = request.transfer_buffer_length as usize;
    let mut entries = Vec::new();
    if page_count <= base {
        return entries;
    }

    let offset = request.offset as usize;
    let len = first_chunk_len(offset, remaining);
    entries.push(SgEntry { page_index: base, offset, length: len });
    remaining -= len;

    for page_index in (base + 1)..page_count {
        if remaining == 0 {
            break;
        }
        let len = first_chunk_len(0, remaining);
        entries.push(SgEntry { page_index, offset: 0, length: len });
        remaining -= len;
    }

    entries
}

/// Chooses a [`TransferBuffer`] according to the controller's buffer
/// policy: scatter/gather on SuperSpeed, a contiguous copy everywhere
/// else.
pub fn build_transfer_buffer(
    request: &Request,
    pages: &[GuestPage],
    speed: ControllerSpeed,
) -> Result<TransferBuffer, BufferError> {
    if speed.is_super() {
        let entries = setup_scatter_gather(request, pages.len());
        Ok(TransferBuffer::ScatterGather(
            entries.into_iter().map(|e| (e.page_index, e.length)).collect(),
        ))
    } else {
        Ok(TransferBuffer::Copy(copy_out(request, pages)?))
    }
}

const ISO_DESCRIPTOR_RECORD_LEN: usize = 16;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads the guest-supplied isochronous packet offsets/lengths off the
/// request's first segment (the descriptor page, present only for
/// isochronous transfers) and validates each packet stays within the
/// overall transfer buffer.
pub fn copy_out_iso_descriptors(
    request: &Request,
    descriptor_page: &GuestPage,
) -> Result<Vec<IsoPacketDescriptor>, BufferError> {
    let nr_packets = request.nr_packets as usize;
    let available = descriptor_page.len() / ISO_DESCRIPTOR_RECORD_LEN;
    if nr_packets > available {
        return Err(BufferError::TooManyIsoPackets { claimed: nr_packets, available });
    }

    let mut descriptors = Vec::with_capacity(nr_packets);
    for i in 0..nr_packets {
        let record = &descriptor_page[i * ISO_DESCRIPTOR_RECORD_LEN..];
        let offset = read_u32(record, 0);
        let length = read_u32(record, 4);
        let end = offset + length;
        if end > request.transfer_buffer_length {
            return Err(BufferError::IsoDescriptorOverflow {
                index: i,
                end,
                limit: request.transfer_buffer_length,
            });
        }
        descriptors.push(IsoPacketDescriptor {
            offset,
            length,
            actual_length: 0,
            status: 0,
        });
    }
    Ok(descriptors)
}

/// Writes completed packet outcomes back onto the descriptor page so the
/// frontend can read per-packet actual length and status.
pub fn copy_in_iso_descriptors(descriptors: &[IsoPacketDescriptor], descriptor_page: &mut GuestPage) {
    for (i, desc) in descriptors.iter().enumerate() {
        let record = &mut descriptor_page[i * ISO_DESCRIPTOR_RECORD_LEN..];
        write_u32(record, 0, desc.offset);
        write_u32(record, 4, desc.length);
        write_u32(record, 8, desc.actual_length);
        write_u32(record, 12, desc.status as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbback_proto::{Direction, Segment, TransferType};

    fn bulk_request(len: u32, offset: u16) -> Request {
        Request {
            id: 1,
            transfer_type: TransferType::Bulk,
            direction: Direction::Out,
            endpoint: 2,
            setup: [0; 8],
            transfer_buffer_length: len,
            offset,
            nr_packets: 0,
            start_frame: 0,
            asap: false,
            short_ok: false,
            segments: vec![Segment { grant_ref: 1 }, Segment { grant_ref: 2 }, Segment { grant_ref: 3 }],
        }
    }

    fn filled_pages(n: usize, fill: impl Fn(usize) -> u8) -> Vec<GuestPage> {
        (0..n)
            .map(|p| vec![fill(p); PAGE_SIZE])
            .collect()
    }

    #[test]
    fn copy_out_assembles_a_contiguous_buffer_spanning_pages() {
        let req = bulk_request(PAGE_SIZE as u32 + 100, 4000);
        let pages = filled_pages(2, |p| p as u8 + 1);
        let out = copy_out(&req, &pages).unwrap();
        assert_eq!(out.len(), req.transfer_buffer_length as usize);
        assert!(out[..96].iter().all(|&b| b == 1));
        assert!(out[96..].iter().all(|&b| b == 2));
    }

    #[test]
    fn copy_out_rejects_a_request_with_no_pages() {
        let req = bulk_request(64, 0);
        let err = copy_out(&req, &[]).unwrap_err();
        assert_eq!(err, BufferError::NoPages);
    }

    #[test]
    fn copy_in_writes_completion_data_back_into_guest_pages() {
        let req = bulk_request(10, 4090);
        let mut pages = filled_pages(2, |_| 0);
        let data = vec![0xAB; 10];
        copy_in(&req, &mut pages, &data).unwrap();
        assert!(pages[0][4090..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn scatter_gather_has_one_entry_per_page_starting_at_the_request_offset() {
        let req = bulk_request(2 * PAGE_SIZE as u32, 1000);
        let entries = setup_scatter_gather(&req, 3);
        assert_eq!(entries[0], SgEntry { page_index: 0, offset: 1000, length: PAGE_SIZE - 1000 });
        assert_eq!(entries[1].offset, 0);
    }

    #[test]
    fn iso_descriptors_roundtrip_through_the_descriptor_page() {
        let mut req = bulk_request(600, 0);
        req.transfer_type = TransferType::Isochronous;
        req.nr_packets = 2;

        let mut page = vec![0u8; PAGE_SIZE];
        write_u32(&mut page, 0, 0);
        write_u32(&mut page, 4, 300);
        write_u32(&mut page, 16, 300);
        write_u32(&mut page, 20, 300);

        let mut descriptors = copy_out_iso_descriptors(&req, &page).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].offset, 300);

        descriptors[0].actual_length = 300;
        descriptors[0].status = 0;
        copy_in_iso_descriptors(&descriptors, &mut page);
        assert_eq!(read_u32(&page, 8), 300);
    }

    #[test]
    fn iso_descriptor_past_the_transfer_buffer_is_rejected() {
        let mut req = bulk_request(100, 0);
        req.transfer_type = TransferType::Isochronous;
        req.nr_packets = 1;

        let mut page = vec![0u8; PAGE_SIZE];
        write_u32(&mut page, 0, 50);
        write_u32(&mut page, 4, 100);

        let err = copy_out_iso_descriptors(&req, &page).unwrap_err();
        assert_eq!(err, BufferError::IsoDescriptorOverflow { index: 0, end: 150, limit: 100 });
    }
}
