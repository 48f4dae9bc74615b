use usbback_proto::{Direction, Protocol, Request, Segment, TransferType, WireStatus};
use usbback_proto::request::Response;

fn sample_requests() -> Vec<Request> {
    vec![
        Request {
            id: 1,
            transfer_type: TransferType::Control,
            direction: Direction::In,
            endpoint: 0,
            setup: [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00],
            transfer_buffer_length: 18,
            offset: 0,
            nr_packets: 0,
            start_frame: 0,
            asap: false,
            short_ok: false,
            segments: vec![Segment { grant_ref: 42 }],
        },
        Request {
            id: 2,
            transfer_type: TransferType::Bulk,
            direction: Direction::Out,
            endpoint: 2,
            setup: [0; 8],
            transfer_buffer_length: 8192,
            offset: 4000,
            nr_packets: 0,
            start_frame: 0,
            asap: false,
            short_ok: true,
            segments: vec![
                Segment { grant_ref: 1 },
                Segment { grant_ref: 2 },
                Segment { grant_ref: 3 },
            ],
        },
        Request {
            id: 3,
            transfer_type: TransferType::Isochronous,
            direction: Direction::In,
            endpoint: 5,
            setup: [0; 8],
            transfer_buffer_length: 564,
            offset: 0,
            nr_packets: 3,
            start_frame: 100,
            asap: true,
            short_ok: false,
            segments: vec![
                Segment { grant_ref: 10 },
                Segment { grant_ref: 11 },
                Segment { grant_ref: 12 },
            ],
        },
        Request {
            id: 4,
            transfer_type: TransferType::Interrupt,
            direction: Direction::In,
            endpoint: 1,
            setup: [0; 8],
            transfer_buffer_length: 8,
            offset: 0,
            nr_packets: 0,
            start_frame: 0,
            asap: false,
            short_ok: false,
            segments: vec![Segment { grant_ref: 7 }],
        },
    ]
}

#[test]
fn request_roundtrip_across_all_layouts() {
    for protocol in [Protocol::Native, Protocol::X86_32, Protocol::X86_64] {
        for req in sample_requests() {
            let bytes = protocol.encode_request(&req).expect("encode");
            let decoded = protocol.decode_request(&bytes).expect("decode");
            assert_eq!(decoded, req, "protocol {protocol:?} mismatch");
        }
    }
}

#[test]
fn response_roundtrip() {
    let cases = vec![
        Response {
            id: 1,
            status: WireStatus::Ok,
            actual_length: 18,
            start_frame: 0,
        },
        Response {
            id: 2,
            status: WireStatus::Cancelled,
            actual_length: 0,
            start_frame: 0,
        },
        Response {
            id: 3,
            status: WireStatus::Stall,
            actual_length: 0,
            start_frame: 7,
        },
    ];

    for resp in cases {
        let bytes = Protocol::Native.encode_response(&resp);
        let decoded = Protocol::Native.decode_response(&bytes).expect("decode");
        assert_eq!(decoded, resp);
    }
}

#[test]
fn decode_rejects_truncated_request() {
    let req = &sample_requests()[0];
    let bytes = Protocol::Native.encode_request(req).unwrap();
    let err = Protocol::Native.decode_request(&bytes[..bytes.len() - 1]).unwrap_err();
    assert_eq!(err, usbback_proto::ProtoError::Truncated);
}

#[test]
fn decode_rejects_unknown_transfer_type() {
    let req = &sample_requests()[0];
    let mut bytes = Protocol::Native.encode_request(req).unwrap();
    bytes[8] = 0xEE;
    let err = Protocol::Native.decode_request(&bytes).unwrap_err();
    assert_eq!(err, usbback_proto::ProtoError::UnknownTransferType(0xEE));
}

#[test]
fn encode_rejects_too_many_segments() {
    let mut req = sample_requests()[0].clone();
    req.segments = (0..(usbback_proto::MAX_SEGMENTS as u32 + 1))
        .map(|grant_ref| Segment { grant_ref })
        .collect();
    let err = Protocol::Native.encode_request(&req).unwrap_err();
    assert_eq!(
        err,
        usbback_proto::ProtoError::TooManySegments(usbback_proto::MAX_SEGMENTS + 1)
    );
}

#[test]
fn x86_32_and_x86_64_layouts_disagree_on_header_length() {
    assert_ne!(
        Protocol::X86_32.request_header_len(),
        Protocol::X86_64.request_header_len()
    );
}
