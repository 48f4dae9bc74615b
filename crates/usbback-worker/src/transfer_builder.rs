use usbback_buffers::{build_transfer_buffer, GuestPage};
use usbback_hostusb::{ControllerSpeed, HostTransfer, IsoPacketRequest, Pipe};
use usbback_proto::{Direction, IsoPacketDescriptor, Request, TransferType};

use crate::endpoint::{log2_interval, EndpointInfo};
use crate::error::DispatchError;

const USB_REQ_CLEAR_FEATURE: u8 = 0x01;
const USB_REQ_SET_CONFIGURATION: u8 = 0x09;
const USB_REQ_SET_INTERFACE: u8 = 0x0B;
const ENDPOINT_HALT: u16 = 0;

const RECIPIENT_MASK: u8 = 0x1F;
const RECIPIENT_DEVICE: u8 = 0;
const RECIPIENT_INTERFACE: u8 = 1;
const RECIPIENT_ENDPOINT: u8 = 2;

fn setup_word(setup: &[u8; 8], low: usize) -> u16 {
    u16::from_le_bytes([setup[low], setup[low + 1]])
}

/// One standard control request the backend recognizes and handles
/// locally, synthesizing the response instead of forwarding it to the
/// device on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalControlRequest {
    SetConfiguration { value: u8 },
    SetInterface { interface: u8, alternate: u8 },
    ClearEndpointHalt { endpoint: u8 },
}

/// Recognizes the three standard control requests the backend intercepts
/// rather than forwards: `SET_CONFIGURATION` (device recipient),
/// `SET_INTERFACE` (interface recipient), and
/// `CLEAR_FEATURE(ENDPOINT_HALT)` (endpoint recipient). Anything else is
/// forwarded verbatim on the control pipe.
pub fn classify_control_request(request: &Request) -> Option<LocalControlRequest> {
    if request.transfer_type != TransferType::Control {
        return None;
    }
    let bm_request_type = request.setup[0];
    let b_request = request.setup[1];
    let w_value = setup_word(&request.setup, 2);
    let w_index = setup_word(&request.setup, 4);
    let recipient = bm_request_type & RECIPIENT_MASK;

    match (b_request, recipient) {
        (USB_REQ_SET_CONFIGURATION, RECIPIENT_DEVICE) => {
            Some(LocalControlRequest::SetConfiguration { value: w_value as u8 })
        }
        (USB_REQ_SET_INTERFACE, RECIPIENT_INTERFACE) => Some(LocalControlRequest::SetInterface {
            interface: w_index as u8,
            alternate: w_value as u8,
        }),
        (USB_REQ_CLEAR_FEATURE, RECIPIENT_ENDPOINT) if w_value == ENDPOINT_HALT => {
            Some(LocalControlRequest::ClearEndpointHalt { endpoint: (w_index & 0xFF) as u8 })
        }
        _ => None,
    }
}

/// The interval (in frames or microframes) a transfer is submitted with:
/// isochronous and high/super-speed interrupt endpoints use
/// `log2_interval`; bulk is always 1; full/low-speed interrupt uses the
/// raw descriptor value.
pub fn compute_interval(
    transfer_type: TransferType,
    speed: ControllerSpeed,
    endpoint: Option<EndpointInfo>,
) -> u16 {
    match transfer_type {
        TransferType::Isochronous => log2_interval(endpoint.map(|e| e.b_interval).unwrap_or(1)),
        TransferType::Bulk => 1,
        TransferType::Interrupt => {
            let b_interval = endpoint.map(|e| e.b_interval).unwrap_or(1);
            if matches!(speed, ControllerSpeed::High | ControllerSpeed::Super) {
                log2_interval(b_interval)
            } else {
                b_interval as u16
            }
        }
        TransferType::Control => 0,
    }
}

/// Builds the host-submittable transfer for a non-intercepted request.
/// `iso_descriptors`, when present, have already been validated by
/// [`usbback_buffers::copy_out_iso_descriptors`].
pub fn build_host_transfer(
    request: &Request,
    speed: ControllerSpeed,
    pages: &[GuestPage],
    endpoint: Option<EndpointInfo>,
    iso_descriptors: &[IsoPacketDescriptor],
) -> Result<HostTransfer, DispatchError> {
    let buffer = build_transfer_buffer(request, pages, speed)?;
    let interval = compute_interval(request.transfer_type, speed, endpoint);
    let short_not_ok = request.direction == Direction::In && !request.short_ok;

    Ok(HostTransfer {
        pipe: Pipe {
            direction: request.direction,
            endpoint: request.endpoint,
            transfer_type: request.transfer_type,
        },
        buffer,
        transfer_buffer_length: request.transfer_buffer_length,
        interval,
        start_frame: request.start_frame,
        asap: request.asap,
        short_not_ok,
        iso_packets: iso_descriptors
            .iter()
            .map(|d| IsoPacketRequest { offset: d.offset, length: d.length })
            .collect(),
    })
}
