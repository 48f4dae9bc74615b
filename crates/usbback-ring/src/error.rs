use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum RingError {
    #[error("completion queue is at capacity")]
    Full,
    #[error("completion queue is closed")]
    Closed,
    #[error("ring page is too small for this protocol")]
    PageTooSmall,
}
