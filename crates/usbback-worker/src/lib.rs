//! The per-connection dispatch loop (drains the shared ring, builds and
//! submits host transfers, reaps completions) and the connection lifecycle
//! state machine that brings a ring/device pairing up and tears it back
//! down.

mod dispatch;
mod endpoint;
mod error;
mod lifecycle;
mod pending;
mod transfer_builder;
mod wake;

pub use dispatch::DispatchWorker;
pub use endpoint::{log2_interval, EndpointInfo, EndpointTable, StaticEndpointTable};
pub use error::{DispatchError, LifecycleError};
pub use lifecycle::{
    ConfigStore, ConnectionState, EventChannelBinder, InMemoryConfigStore, InMemoryEventChannelBinder,
    InMemoryRingMapper, LifecycleDriver, RingMapper,
};
pub use pending::PendingRequest;
pub use transfer_builder::{build_host_transfer, classify_control_request, compute_interval, LocalControlRequest};
pub use wake::WorkerWake;
