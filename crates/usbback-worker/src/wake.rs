use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// The condition the dispatch loop blocks on between iterations: a guest
/// notification arriving, a completion being queued, or shutdown being
/// requested. Completions already have their own wake path through
/// [`usbback_ring::CompletionQueue`]; this covers the guest-notification
/// and shutdown sources, which the worker polls alongside it.
#[derive(Default)]
pub struct WorkerWake {
    state: Mutex<()>,
    condvar: Condvar,
}

impl WorkerWake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.condvar.notify_all();
    }

    pub fn wait_timeout(&self, timeout: Duration) {
        let guard = self.state.lock().unwrap();
        let _ = self.condvar.wait_timeout(guard, timeout).unwrap();
    }
}
