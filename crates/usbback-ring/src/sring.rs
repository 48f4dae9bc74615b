use usbback_proto::{Protocol, Request, Response, MAX_SEGMENTS};

use crate::error::RingError;

/// Size of the shared page the ring lives on. One page per connection,
/// matching the frontend/backend contract: exactly one grant ref is ever
/// negotiated for the control ring itself (separate from the per-transfer
/// data grants a request's segments name).
pub const PAGE_SIZE: usize = 4096;

const HEADER_LEN: usize = 16;

/// The backend-side view of one shared ring page: request and response
/// arrays plus the producer/consumer cursors that hand requests from
/// frontend to backend and responses back. Mirrors the classic
/// `BACK_RING_INIT`/`RING_HAS_UNCONSUMED_REQUESTS`/
/// `RING_PUSH_RESPONSES_AND_CHECK_NOTIFY` control-ring macros, generalized
/// across this protocol's three wire layouts.
///
/// Request and response slots live in two separate fixed-stride arrays
/// rather than sharing one union'd slot per index: Rust has no portable
/// equivalent of the C union-of-structs trick, and a frontend never reads
/// a response out of a slot it hasn't been told (via `rsp_prod`) is valid,
/// so the two layouts are wire-compatible in every way that matters.
pub struct BackRing {
    protocol: Protocol,
    page: Vec<u8>,
    req_slot_len: usize,
    rsp_slot_len: usize,
    nr_ents: u32,
    req_cons: u32,
    rsp_prod_pvt: u32,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl BackRing {
    /// `page` is the already-mapped shared page (grant mapping itself is
    /// host infrastructure this crate has no view of; callers obtain the
    /// bytes however their environment maps foreign-domain pages).
    pub fn new(protocol: Protocol, page: Vec<u8>) -> Result<Self, RingError> {
        if page.len() != PAGE_SIZE {
            return Err(RingError::PageTooSmall);
        }
        let req_slot_len = protocol.request_len(MAX_SEGMENTS);
        let rsp_slot_len = protocol.response_len();
        let mut nr_ents: u32 = 1;
        while HEADER_LEN + (nr_ents as usize * 2) * (req_slot_len + rsp_slot_len) <= PAGE_SIZE {
            nr_ents *= 2;
        }
        nr_ents /= 2;
        if nr_ents == 0 {
            return Err(RingError::PageTooSmall);
        }
        Ok(BackRing {
            protocol,
            page,
            req_slot_len,
            rsp_slot_len,
            nr_ents,
            req_cons: 0,
            rsp_prod_pvt: 0,
        })
    }

    pub fn nr_ents(&self) -> u32 {
        self.nr_ents
    }

    /// Consumes the ring, handing back the underlying page. Used at
    /// teardown, after the event channel has been unbound, to return the
    /// page to whatever unmaps the grant.
    pub fn into_page(self) -> Vec<u8> {
        self.page
    }

    /// Test/harness helper: overwrites this ring's page with another
    /// side's byte image, modelling the two ends of a real grant-mapped
    /// page becoming visible to each other. Panics if the lengths differ.
    pub fn load_page_for_test(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.page.len());
        self.page.copy_from_slice(bytes);
    }

    /// Test/harness helper: a snapshot of this ring's page bytes.
    pub fn page_snapshot_for_test(&self) -> Vec<u8> {
        self.page.clone()
    }

    fn req_prod(&self) -> u32 {
        read_u32(&self.page, 0)
    }

    fn req_event_set(&mut self, value: u32) {
        write_u32(&mut self.page, 4, value);
    }

    fn rsp_prod_set(&mut self, value: u32) {
        write_u32(&mut self.page, 8, value);
    }

    fn rsp_event(&self) -> u32 {
        read_u32(&self.page, 12)
    }

    fn req_offset(&self, idx: u32) -> usize {
        HEADER_LEN + (idx % self.nr_ents) as usize * self.req_slot_len
    }

    fn rsp_offset(&self, idx: u32) -> usize {
        HEADER_LEN + self.nr_ents as usize * self.req_slot_len + (idx % self.nr_ents) as usize * self.rsp_slot_len
    }

    /// True while the frontend has produced requests the backend hasn't
    /// consumed yet.
    pub fn has_unconsumed_requests(&self) -> bool {
        self.req_cons != self.req_prod()
    }

    pub fn req_cons(&self) -> u32 {
        self.req_cons
    }

    /// Decodes and consumes the next request. Panics if called without
    /// first checking `has_unconsumed_requests`, matching the macro
    /// contract it replaces: callers never call this speculatively.
    pub fn consume_request(&mut self) -> Result<Request, usbback_proto::ProtoError> {
        assert!(self.has_unconsumed_requests());
        let offset = self.req_offset(self.req_cons);
        let slot = &self.page[offset..offset + self.req_slot_len];
        let request = self.protocol.decode_request(slot)?;
        self.req_cons = self.req_cons.wrapping_add(1);
        Ok(request)
    }

    /// Writes one response into the backend's private production cursor.
    /// Not yet visible to the frontend until [`BackRing::push_responses`].
    pub fn put_response(&mut self, response: &Response) {
        let offset = self.rsp_offset(self.rsp_prod_pvt);
        let bytes = self.protocol.encode_response(response);
        self.page[offset..offset + self.rsp_slot_len].copy_from_slice(&bytes);
        self.rsp_prod_pvt = self.rsp_prod_pvt.wrapping_add(1);
    }

    /// Publishes every response written since the last call, returning
    /// whether the frontend should be notified (its event index still
    /// trails the newly published production index).
    pub fn push_responses(&mut self) -> bool {
        let old_prod = read_u32(&self.page, 8);
        self.rsp_prod_set(self.rsp_prod_pvt);
        let new_prod = self.rsp_prod_pvt;
        let event = self.rsp_event();
        new_prod.wrapping_sub(event) < new_prod.wrapping_sub(old_prod).wrapping_add(1)
    }

    /// Mirrors `RING_FINAL_CHECK_FOR_REQUESTS`: called right before a
    /// dispatch worker would block waiting for more work. Arms the
    /// frontend's notify-on-produce threshold and re-checks for a request
    /// that might have landed in the gap between the worker's last drain
    /// and this call, closing the classic wait/notify race.
    pub fn final_check_for_requests(&mut self) -> bool {
        if self.has_unconsumed_requests() {
            return true;
        }
        self.req_event_set(self.req_cons.wrapping_add(1));
        self.has_unconsumed_requests()
    }
}
