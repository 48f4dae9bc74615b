use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ClaimError {
    #[error("interface {interface} of configuration {configuration} is already owned by another connection")]
    InterfaceBusy { configuration: u8, interface: u8 },
    #[error("the process-wide device map is full")]
    MapFull,
    #[error("device {bus}.{device} is not present in the device map")]
    NotMapped { bus: u32, device: u32 },
}
