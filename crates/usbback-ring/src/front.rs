use usbback_proto::{Protocol, Request, Response, MAX_SEGMENTS};

use crate::error::RingError;
use crate::sring::PAGE_SIZE;

const HEADER_LEN: usize = 16;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// The frontend's view of the same shared page a [`crate::BackRing`] reads.
/// The real frontend lives in the guest and is out of this crate's scope;
/// this exists to drive a backend's ring from tests without a second
/// process, the same way the original frontend/backend pair of ring macros
/// are two ends of one layout.
pub struct FrontRing {
    protocol: Protocol,
    page: Vec<u8>,
    req_slot_len: usize,
    rsp_slot_len: usize,
    nr_ents: u32,
    req_prod_pvt: u32,
    rsp_cons: u32,
}

impl FrontRing {
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
        Ok(FrontRing {
            protocol,
            page,
            req_slot_len,
            rsp_slot_len,
            nr_ents,
            req_prod_pvt: 0,
            rsp_cons: 0,
        })
    }

    fn req_prod_set(&mut self, value: u32) {
        write_u32(&mut self.page, 0, value);
    }

    fn rsp_prod(&self) -> u32 {
        read_u32(&self.page, 8)
    }

    fn req_offset(&self, idx: u32) -> usize {
        HEADER_LEN + (idx % self.nr_ents) as usize * self.req_slot_len
    }

    fn rsp_offset(&self, idx: u32) -> usize {
        HEADER_LEN + self.nr_ents as usize * self.req_slot_len + (idx % self.nr_ents) as usize * self.rsp_slot_len
    }

    /// Writes one request into the frontend's private production cursor
    /// and immediately publishes it, as a test driver has no reason to
    /// batch the way a real frontend might.
    pub fn push_request(&mut self, request: &Request) -> Result<(), usbback_proto::ProtoError> {
        let offset = self.req_offset(self.req_prod_pvt);
        let bytes = self.protocol.encode_request(request)?;
        self.page[offset..offset + self.req_slot_len].copy_from_slice(&bytes);
        self.req_prod_pvt = self.req_prod_pvt.wrapping_add(1);
        self.req_prod_set(self.req_prod_pvt);
        Ok(())
    }

    pub fn has_unconsumed_responses(&self) -> bool {
        self.rsp_cons != self.rsp_prod()
    }

    pub fn pop_response(&mut self) -> Result<Response, usbback_proto::ProtoError> {
        assert!(self.has_unconsumed_responses());
        let offset = self.rsp_offset(self.rsp_cons);
        let slot = &self.page[offset..offset + self.rsp_slot_len];
        let response = self.protocol.decode_response(slot)?;
        self.rsp_cons = self.rsp_cons.wrapping_add(1);
        Ok(response)
    }

    pub fn into_page(self) -> Vec<u8> {
        self.page
    }

    /// Test/harness helper: overwrites this ring's page with another
    /// side's byte image. See [`crate::BackRing::load_page_for_test`].
    pub fn load_page_for_test(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.page.len());
        self.page.copy_from_slice(bytes);
    }

    /// Test/harness helper: a snapshot of this ring's page bytes.
    pub fn page_snapshot_for_test(&self) -> Vec<u8> {
        self.page.clone()
    }
}
