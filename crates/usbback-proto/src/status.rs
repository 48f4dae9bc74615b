/// The wire status taxonomy a response carries back to the frontend.
///
/// This is deliberately coarser than the host USB stack's own error codes;
/// `usbback-hostusb` translates host completion codes down to this set (see
/// `usbback-hostusb::TransferOutcome::to_wire_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    /// Transfer completed; see the response's `actual_length`.
    Ok,
    /// Endpoint STALLed (pipe error). Reported verbatim except for
    /// `CLEAR_FEATURE(ENDPOINT_HALT)`, where a stall is folded into `Ok`.
    Stall,
    /// The device vanished (unplug, reset race) partway through.
    NoDevice,
    /// The transfer was killed by a flush/reset/disconnect.
    Cancelled,
    /// Unaligned or over-length transfer the host controller rejected.
    Overflow,
    /// A host I/O error not covered by a more specific variant.
    Io,
    /// The request was malformed (e.g. an ISO descriptor overran the
    /// transfer buffer) and was rejected before submission.
    InvalidArgument,
    /// The endpoint named by the request does not exist on this device.
    EndpointNotFound,
    /// The device is not yet addressed/configured.
    NotReady,
}

impl WireStatus {
    /// The integer code written into the response slot on the ring.
    ///
    /// `0` means success; all non-zero values are negative-errno-shaped, the
    /// way the original driver reuses host kernel error numbers directly.
    pub fn to_wire_code(self) -> i32 {
        match self {
            WireStatus::Ok => 0,
            WireStatus::Stall => -32,         // EPIPE
            WireStatus::NoDevice => -19,      // ENODEV
            WireStatus::Cancelled => -125,    // ECANCELED
            WireStatus::Overflow => -75,      // EOVERFLOW
            WireStatus::Io => -5,             // EIO
            WireStatus::InvalidArgument => -22, // EINVAL
            WireStatus::EndpointNotFound => -2, // ENOENT
            WireStatus::NotReady => -16,      // EBUSY
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, WireStatus::Ok)
    }
}
