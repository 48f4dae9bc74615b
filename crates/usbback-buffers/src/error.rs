use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BufferError {
    #[error("no guest pages were attached to this request")]
    NoPages,
    #[error("iso packet {index} ends at {end}, past the transfer buffer length {limit}")]
    IsoDescriptorOverflow { index: usize, end: u32, limit: u32 },
    #[error("request claims {claimed} iso packets but only {available} descriptors fit on the page")]
    TooManyIsoPackets { claimed: usize, available: usize },
}
