use crate::error::ProtoError;
use crate::layout::status_from_code;
use crate::request::Response;

/// id(8) + status(4) + actual_length(4) + start_frame(2) + reserved(2).
/// Identical across all three protocols: a response never carries a
/// variable-length segment array, so there is nothing for guest word-size
/// to misalign.
pub const RESPONSE_LEN: usize = 20;

pub fn encode(resp: &Response) -> Vec<u8> {
    let mut buf = vec![0u8; RESPONSE_LEN];
    buf[0..8].copy_from_slice(&resp.id.to_le_bytes());
    buf[8..12].copy_from_slice(&resp.status.to_wire_code().to_le_bytes());
    buf[12..16].copy_from_slice(&resp.actual_length.to_le_bytes());
    buf[16..18].copy_from_slice(&resp.start_frame.to_le_bytes());
    buf
}

pub fn decode(bytes: &[u8]) -> Result<Response, ProtoError> {
    if bytes.len() < RESPONSE_LEN {
        return Err(ProtoError::Truncated);
    }
    let id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let code = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let actual_length = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let start_frame = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
    Ok(Response {
        id,
        status: status_from_code(code),
        actual_length,
        start_frame,
    })
}
