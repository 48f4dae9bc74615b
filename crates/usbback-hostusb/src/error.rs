use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum HostUsbError {
    #[error("no device at {bus}.{device}")]
    NoSuchDevice { bus: u32, device: u32 },
    #[error("device handle is no longer valid")]
    Stale,
    #[error("device is not running")]
    NotRunning,
    #[error("endpoint {0} not present on this device")]
    NoSuchEndpoint(u8),
    #[error("host rejected configuration value {0}")]
    SetConfigurationFailed(u8),
}
