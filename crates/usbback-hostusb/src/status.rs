use usbback_proto::WireStatus;

use crate::types::HostStatus;

/// Translates a host completion status into the coarser set that crosses
/// the ring. `HostStatus::Io` covers every host-stack error code this
/// crate doesn't otherwise distinguish; callers that care about the
/// original host error log it separately rather than widening this enum.
pub fn to_wire_status(status: HostStatus) -> WireStatus {
    match status {
        HostStatus::Ok => WireStatus::Ok,
        HostStatus::Stall => WireStatus::Stall,
        HostStatus::NoDevice => WireStatus::NoDevice,
        HostStatus::Cancelled => WireStatus::Cancelled,
        HostStatus::Overflow => WireStatus::Overflow,
        HostStatus::Io => WireStatus::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_host_status_maps_to_a_success_or_failure_wire_status() {
        let cases = [
            (HostStatus::Ok, WireStatus::Ok),
            (HostStatus::Stall, WireStatus::Stall),
            (HostStatus::NoDevice, WireStatus::NoDevice),
            (HostStatus::Cancelled, WireStatus::Cancelled),
            (HostStatus::Overflow, WireStatus::Overflow),
            (HostStatus::Io, WireStatus::Io),
        ];
        for (host, wire) in cases {
            assert_eq!(to_wire_status(host), wire);
        }
        assert!(to_wire_status(HostStatus::Ok).is_success());
        assert!(!to_wire_status(HostStatus::Stall).is_success());
    }
}
