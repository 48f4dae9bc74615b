use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use usbback_buffers::{copy_in, copy_in_iso_descriptors, copy_out_iso_descriptors, GuestPage};
use usbback_device::{Connection, GrantMapper};
use usbback_hostusb::{
    CompletionSink, ControllerSpeed, DeviceHandle, HostStatus, HostUsbAdapter, TransferCompletion,
    TransferTicket,
};
use usbback_proto::{Direction, Request, Response, WireStatus};
use usbback_ring::{BackRing, CompletionQueue};

use crate::endpoint::EndpointTable;
use crate::error::DispatchError;
use crate::pending::PendingRequest;
use crate::transfer_builder::{build_host_transfer, classify_control_request, LocalControlRequest};
use crate::wake::WorkerWake;

struct WorkerCompletionSink {
    queue: Arc<CompletionQueue<TransferCompletion>>,
}

impl CompletionSink for WorkerCompletionSink {
    fn complete(&self, completion: TransferCompletion) {
        let _ = self.queue.push_blocking(completion);
    }
}

/// The single per-connection task that drains the shared ring, builds and
/// submits host transfers, and reaps completions. Owns no other
/// connection's state: every field here is scoped to exactly one guest
/// pairing.
pub struct DispatchWorker {
    ring: Mutex<BackRing>,
    completions: Arc<CompletionQueue<TransferCompletion>>,
    host: Arc<dyn HostUsbAdapter>,
    device: DeviceHandle,
    grants: Arc<dyn GrantMapper>,
    endpoints: Arc<dyn EndpointTable>,
    connection: Arc<Connection>,
    speed: ControllerSpeed,
    wake: Arc<WorkerWake>,
    shutdown: AtomicBool,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    ticket_to_id: Mutex<HashMap<TransferTicket, u64>>,
    notify_guest: Box<dyn Fn() + Send + Sync>,
}

impl DispatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: BackRing,
        completions: Arc<CompletionQueue<TransferCompletion>>,
        host: Arc<dyn HostUsbAdapter>,
        device: DeviceHandle,
        grants: Arc<dyn GrantMapper>,
        endpoints: Arc<dyn EndpointTable>,
        connection: Arc<Connection>,
        wake: Arc<WorkerWake>,
        notify_guest: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Self, DispatchError> {
        let speed = host.controller_speed(device)?;
        Ok(DispatchWorker {
            ring: Mutex::new(ring),
            completions,
            host,
            device,
            grants,
            endpoints,
            connection,
            speed,
            wake,
            shutdown: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            ticket_to_id: Mutex::new(HashMap::new()),
            notify_guest,
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.completions.close();
        self.wake.notify();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Reclaims the ring once the worker has stopped, for a caller that
    /// needs to hand it to [`crate::lifecycle::LifecycleDriver::disconnect`].
    /// Only meaningful once [`DispatchWorker::run`] has returned and
    /// nothing else still holds a reference to this worker.
    pub fn into_ring(self) -> BackRing {
        self.ring.into_inner().unwrap()
    }

    /// Test/harness helper: delivers another side's ring page image onto
    /// this worker's ring. See [`usbback_ring::BackRing::load_page_for_test`].
    #[cfg(any(test, feature = "test-util"))]
    pub fn load_ring_page_for_test(&self, bytes: &[u8]) {
        self.ring.lock().unwrap().load_page_for_test(bytes);
    }

    /// Test/harness helper: a snapshot of this worker's ring page bytes.
    #[cfg(any(test, feature = "test-util"))]
    pub fn ring_page_snapshot_for_test(&self) -> Vec<u8> {
        self.ring.lock().unwrap().page_snapshot_for_test()
    }

    /// Test/harness helper: flips this worker's connection into the
    /// cancelling state, as a flush or reset would.
    #[cfg(any(test, feature = "test-util"))]
    pub fn begin_cancelling_for_test(&self) {
        self.connection.begin_cancelling();
    }

    /// Runs the worker loop until shutdown is requested. Blocks the
    /// calling thread; callers spawn this on its own task/thread.
    pub fn run(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) && self.pending_count() == 0 {
                return;
            }
            let did_completions = self.drain_completions() > 0;
            let did_submissions = self.drain_submissions() > 0;

            if did_completions || did_submissions {
                continue;
            }

            let armed = {
                let mut ring = self.ring.lock().unwrap();
                ring.final_check_for_requests()
            };
            if armed || !self.completions.is_empty() {
                continue;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            self.wake.wait_timeout(Duration::from_millis(50));
        }
    }

    /// Drains every completion currently queued, translating each into a
    /// published response. Returns how many were processed.
    pub fn drain_completions(&self) -> usize {
        let mut processed = 0;
        loop {
            match self.completions.try_pop() {
                Ok(Some(completion)) => {
                    processed += 1;
                    self.handle_completion(completion);
                }
                Ok(None) | Err(_) => break,
            }
        }
        if processed > 0 {
            let notify = self.ring.lock().unwrap().push_responses();
            if notify {
                (self.notify_guest)();
            }
        }
        processed
    }

    fn handle_completion(&self, completion: TransferCompletion) {
        let id = match self.ticket_to_id.lock().unwrap().remove(&completion.ticket) {
            Some(id) => id,
            None => return,
        };
        let pending = match self.pending.lock().unwrap().remove(&id) {
            Some(p) => p,
            None => return,
        };

        let PendingRequest { request, mut pages, grant_refs, mut iso_descriptors, .. } = pending;

        if request.direction == Direction::In && completion.status == HostStatus::Ok {
            if let Some(data) = &completion.data {
                let _ = copy_in(&request, &mut pages, data);
            }
            if request.is_isochronous() && !pages.is_empty() {
                for (desc, result) in iso_descriptors.iter_mut().zip(&completion.iso_results) {
                    desc.actual_length = result.actual_length;
                    desc.status = usbback_hostusb::to_wire_status(result.status).to_wire_code();
                }
                let (descriptor_page, _) = pages.split_first_mut().unwrap();
                copy_in_iso_descriptors(&iso_descriptors, descriptor_page);
            }
        }

        for (page, grant_ref) in pages.into_iter().zip(grant_refs) {
            self.grants.unmap(grant_ref, page);
        }

        let wire_status = usbback_hostusb::to_wire_status(completion.status);
        self.connection
            .stats
            .record_request(request.transfer_type, request.direction == Direction::In, completion.actual_length as u64);
        if !wire_status.is_success() {
            self.connection.stats.record_error();
        }

        let response = Response {
            id: request.id,
            status: wire_status,
            actual_length: completion.actual_length,
            start_frame: request.start_frame,
        };
        debug!(req_id = request.id, ?wire_status, actual_length = completion.actual_length, "completed");
        self.ring.lock().unwrap().put_response(&response);
        self.connection.release();
    }

    /// Drains every request currently visible on the front ring. Returns
    /// how many were processed.
    pub fn drain_submissions(&self) -> usize {
        let mut ring = self.ring.lock().unwrap();
        let mut processed = 0;
        while ring.has_unconsumed_requests() {
            let request = match ring.consume_request() {
                Ok(r) => r,
                Err(_) => break,
            };
            processed += 1;

            if self.connection.is_cancelling() {
                ring.put_response(&Response {
                    id: request.id,
                    status: WireStatus::Cancelled,
                    actual_length: 0,
                    start_frame: 0,
                });
                continue;
            }

            if let Some(local) = classify_control_request(&request) {
                self.handle_local(&mut ring, &request, local);
                continue;
            }

            self.submit_forwarded(&mut ring, request);
        }
        if processed > 0 {
            let notify = ring.push_responses();
            drop(ring);
            if notify {
                (self.notify_guest)();
            }
        }
        processed
    }

    fn reject(&self, ring: &mut BackRing, request: &Request, error: DispatchError) {
        warn!(req_id = request.id, endpoint = request.endpoint, %error, "rejecting request");
        self.connection.stats.record_error();
        ring.put_response(&Response {
            id: request.id,
            status: error.to_wire_status(),
            actual_length: 0,
            start_frame: 0,
        });
    }

    fn handle_local(&self, ring: &mut BackRing, request: &Request, local: LocalControlRequest) {
        let result = match local {
            LocalControlRequest::SetConfiguration { value } => {
                self.host.set_configuration(self.device, value)
            }
            LocalControlRequest::SetInterface { interface, alternate } => {
                self.host.set_interface(self.device, interface, alternate)
            }
            LocalControlRequest::ClearEndpointHalt { endpoint } => {
                self.host.clear_halt(self.device, endpoint)
            }
        };
        match result {
            Ok(()) => {
                debug!(req_id = request.id, ?local, "handled control request locally");
                self.connection.stats.record_request(request.transfer_type, request.direction == Direction::In, 0);
                ring.put_response(&Response {
                    id: request.id,
                    status: WireStatus::Ok,
                    actual_length: 0,
                    start_frame: 0,
                });
            }
            Err(e) => self.reject(ring, request, e.into()),
        }
    }

    fn map_pages(&self, request: &Request) -> Result<(Vec<GuestPage>, Vec<u32>), DispatchError> {
        let mut pages = Vec::with_capacity(request.segments.len());
        let mut refs = Vec::with_capacity(request.segments.len());
        for segment in &request.segments {
            let page = self.grants.map(segment.grant_ref).ok_or(DispatchError::NotReady)?;
            pages.push(page);
            refs.push(segment.grant_ref);
        }
        Ok((pages, refs))
    }

    fn unmap_pages(&self, pages: Vec<GuestPage>, refs: &[u32]) {
        for (page, grant_ref) in pages.into_iter().zip(refs) {
            self.grants.unmap(*grant_ref, page);
        }
    }

    fn submit_forwarded(&self, ring: &mut BackRing, request: Request) {
        match self.host.running(self.device) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                self.reject(ring, &request, DispatchError::NotReady);
                return;
            }
        }

        let (pages, refs) = match self.map_pages(&request) {
            Ok(v) => v,
            Err(e) => {
                self.reject(ring, &request, e);
                return;
            }
        };

        let iso_descriptors = if request.is_isochronous() {
            match copy_out_iso_descriptors(&request, &pages[0]) {
                Ok(d) => d,
                Err(e) => {
                    self.unmap_pages(pages, &refs);
                    self.reject(ring, &request, e.into());
                    return;
                }
            }
        } else {
            Vec::new()
        };

        let endpoint_info = self.endpoints.lookup(request.endpoint);
        let transfer = match build_host_transfer(&request, self.speed, &pages, endpoint_info, &iso_descriptors) {
            Ok(t) => t,
            Err(e) => {
                self.unmap_pages(pages, &refs);
                self.reject(ring, &request, e);
                return;
            }
        };

        self.connection.acquire();
        let sink = Arc::new(WorkerCompletionSink { queue: self.completions.clone() });
        match self.host.submit(self.device, transfer, sink) {
            Ok(ticket) => {
                debug!(req_id = request.id, endpoint = request.endpoint, ?ticket, "submitted to host");
                self.ticket_to_id.lock().unwrap().insert(ticket, request.id);
                self.pending.lock().unwrap().insert(
                    request.id,
                    PendingRequest { request, pages, grant_refs: refs, iso_descriptors, ticket },
                );
            }
            Err(e) => {
                self.connection.release();
                self.unmap_pages(pages, &refs);
                self.reject(ring, &request, e.into());
            }
        }
    }
}
