/// The subset of a USB endpoint descriptor the dispatch worker needs to
/// compute a transfer's polling interval. Descriptor parsing itself
/// belongs to the host USB stack; this is the seam a real backend reads
/// the claimed device's descriptors through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Raw `bInterval` as reported by the device descriptor.
    pub b_interval: u8,
}

pub trait EndpointTable: Send + Sync {
    fn lookup(&self, endpoint: u8) -> Option<EndpointInfo>;
}

/// A fixed, in-memory endpoint table for tests and for hosts that parse
/// descriptors once at claim time.
#[derive(Default)]
pub struct StaticEndpointTable {
    endpoints: std::collections::HashMap<u8, EndpointInfo>,
}

impl StaticEndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: u8, b_interval: u8) -> Self {
        self.endpoints.insert(endpoint, EndpointInfo { b_interval });
        self
    }
}

impl EndpointTable for StaticEndpointTable {
    fn lookup(&self, endpoint: u8) -> Option<EndpointInfo> {
        self.endpoints.get(&endpoint).copied()
    }
}

/// `1 << min(15, b_interval - 1)`, the microframe interval used for
/// isochronous and high/super-speed interrupt endpoints. `b_interval` of
/// 0 is treated as 1 (the smallest legal descriptor value).
pub fn log2_interval(b_interval: u8) -> u16 {
    let shift = b_interval.saturating_sub(1).min(15);
    1u16 << shift
}
