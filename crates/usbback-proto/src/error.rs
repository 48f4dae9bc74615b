use thiserror::Error;

/// Failures that can occur while encoding or decoding a request/response
/// across one of the three on-wire [`crate::layout::Protocol`] layouts.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ProtoError {
    #[error("buffer too short to hold a request/response record")]
    Truncated,
    #[error("unknown transfer type tag {0}")]
    UnknownTransferType(u8),
    #[error("unknown direction tag {0}")]
    UnknownDirection(u8),
    #[error("request carries {0} segments, more than the protocol allows")]
    TooManySegments(usize),
}
