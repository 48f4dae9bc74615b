//! Ring-cursor bookkeeping (the shared request/response page) and the
//! backend-internal completion queue that ferries host completions from
//! host-stack callback threads to the single dispatch worker task that
//! owns a connection's ring.

mod error;
mod front;
mod queue;
mod sring;

pub use error::RingError;
pub use front::FrontRing;
pub use queue::CompletionQueue;
pub use sring::{BackRing, PAGE_SIZE};
