use std::sync::{Arc, Mutex};

use usbback_hostusb::{
    ControllerSpeed, HostStatus, HostTransfer, HostUsbAdapter, HostUsbError, Pipe, SimHost,
    TransferBuffer, TransferCompletion,
};
use usbback_proto::{Direction, TransferType};

fn sample_transfer() -> HostTransfer {
    HostTransfer {
        pipe: Pipe {
            direction: Direction::In,
            endpoint: 1,
            transfer_type: TransferType::Bulk,
        },
        buffer: TransferBuffer::Copy(vec![0u8; 64]),
        transfer_buffer_length: 64,
        interval: 0,
        start_frame: 0,
        asap: false,
        short_not_ok: false,
        iso_packets: Vec::new(),
    }
}

#[derive(Default)]
struct RecordingSink {
    completions: Mutex<Vec<TransferCompletion>>,
}

impl usbback_hostusb::CompletionSink for RecordingSink {
    fn complete(&self, completion: TransferCompletion) {
        self.completions.lock().unwrap().push(completion);
    }
}

#[test]
fn open_finds_a_registered_device_by_bus_and_device_number() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    assert_eq!(host.open(1, 2).unwrap(), handle);
}

#[test]
fn open_rejects_an_unknown_bus_device_pair() {
    let host = SimHost::new();
    host.register(1, 2, ControllerSpeed::High);
    let err = host.open(1, 3).unwrap_err();
    assert_eq!(err, HostUsbError::NoSuchDevice { bus: 1, device: 3 });
}

#[test]
fn set_configuration_is_idempotent() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    host.set_configuration(handle, 1).unwrap();
    host.set_configuration(handle, 1).unwrap();
    assert!(host.running(handle).unwrap());
}

#[test]
fn operations_against_a_stale_handle_fail() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::Super);
    host.unplug(handle);
    assert_eq!(
        host.set_configuration(handle, 1).unwrap_err(),
        HostUsbError::Stale
    );
    assert_eq!(host.running(handle).unwrap_err(), HostUsbError::Stale);
}

#[test]
fn submit_then_complete_delivers_exactly_one_completion() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    let sink = Arc::new(RecordingSink::default());
    let ticket = host.submit(handle, sample_transfer(), sink.clone()).unwrap();
    host.complete(ticket, HostStatus::Ok, 64, Vec::new());

    let completions = sink.completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, HostStatus::Ok);
    assert_eq!(completions[0].actual_length, 64);
}

#[test]
fn flush_endpoint_cancels_every_pending_transfer_on_the_device() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    let sink = Arc::new(RecordingSink::default());
    host.submit(handle, sample_transfer(), sink.clone()).unwrap();
    host.submit(handle, sample_transfer(), sink.clone()).unwrap();

    host.flush_endpoint(handle, 1).unwrap();

    assert!(host.all_drained(handle));
    let completions = sink.completions.lock().unwrap();
    assert_eq!(completions.len(), 2);
    assert!(completions.iter().all(|c| c.status == HostStatus::Cancelled));
}

#[test]
fn set_interface_and_clear_halt_succeed_against_a_live_device() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    host.set_interface(handle, 0, 1).unwrap();
    host.clear_halt(handle, 1).unwrap();
}

#[test]
fn set_interface_against_a_stale_handle_fails() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    host.unplug(handle);
    assert_eq!(host.set_interface(handle, 0, 1).unwrap_err(), HostUsbError::Stale);
}

#[test]
fn reenumerate_reports_false_once_the_device_is_unplugged() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::LowFull);
    assert!(host.reenumerate(handle).unwrap());
    host.unplug(handle);
    assert!(!host.reenumerate(handle).unwrap());
}

#[test]
fn cancel_delivers_a_cancelled_completion_without_a_separate_drain_call() {
    let host = SimHost::new();
    let handle = host.register(1, 2, ControllerSpeed::High);
    let sink = Arc::new(RecordingSink::default());
    let ticket = host.submit(handle, sample_transfer(), sink.clone()).unwrap();

    host.cancel(handle, ticket);

    assert!(host.all_drained(handle));
    assert_eq!(sink.completions.lock().unwrap()[0].status, HostStatus::Cancelled);
}
