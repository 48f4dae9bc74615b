use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use usbback_proto::TransferType;

/// Per-connection request and error counters, matching the sysfs
/// attribute set the original exposes per `usbif` (`st_oo_req`,
/// `st_in_req`, `st_out_req`, `st_error`, `st_reset`, `st_in_bandwidth`,
/// `st_out_bandwidth`, `st_cntrl_req`, `st_isoc_req`, `st_bulk_req`,
/// `st_int_req`). The sysfs surface itself is out of scope here; the
/// counters are kept regardless since they're cheap bookkeeping any
/// frontend of this crate (a metrics exporter, an admin CLI) will want.
#[derive(Default)]
pub struct Stats {
    out_of_order_requests: AtomicU64,
    in_requests: AtomicU64,
    out_requests: AtomicU64,
    errors: AtomicU64,
    resets: AtomicU64,
    in_bandwidth: AtomicU64,
    out_bandwidth: AtomicU64,
    control_requests: AtomicU64,
    isochronous_requests: AtomicU64,
    bulk_requests: AtomicU64,
    interrupt_requests: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one completed request of `transfer_type` moving
    /// `bytes` bytes in direction `inbound`.
    pub fn record_request(&self, transfer_type: TransferType, inbound: bool, bytes: u64) {
        if inbound {
            self.in_requests.fetch_add(1, Ordering::Relaxed);
            self.in_bandwidth.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.out_requests.fetch_add(1, Ordering::Relaxed);
            self.out_bandwidth.fetch_add(bytes, Ordering::Relaxed);
        }
        let counter = match transfer_type {
            TransferType::Control => &self.control_requests,
            TransferType::Isochronous => &self.isochronous_requests,
            TransferType::Bulk => &self.bulk_requests,
            TransferType::Interrupt => &self.interrupt_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn out_of_order_requests(&self) -> u64 {
        self.out_of_order_requests.load(Ordering::Relaxed)
    }
    pub fn in_requests(&self) -> u64 {
        self.in_requests.load(Ordering::Relaxed)
    }
    pub fn out_requests(&self) -> u64 {
        self.out_requests.load(Ordering::Relaxed)
    }
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
    pub fn in_bandwidth(&self) -> u64 {
        self.in_bandwidth.load(Ordering::Relaxed)
    }
    pub fn out_bandwidth(&self) -> u64 {
        self.out_bandwidth.load(Ordering::Relaxed)
    }
    pub fn control_requests(&self) -> u64 {
        self.control_requests.load(Ordering::Relaxed)
    }
    pub fn isochronous_requests(&self) -> u64 {
        self.isochronous_requests.load(Ordering::Relaxed)
    }
    pub fn bulk_requests(&self) -> u64 {
        self.bulk_requests.load(Ordering::Relaxed)
    }
    pub fn interrupt_requests(&self) -> u64 {
        self.interrupt_requests.load(Ordering::Relaxed)
    }
}

/// One frontend connection's shared, cross-task state: the in-flight
/// request refcount used to drain transfers to zero before the ring can
/// be unmapped, the advisory cancellation flag checked by the dispatch
/// loop, and this connection's statistics.
///
/// `canceling_requests` is advisory only: it tells the dispatch loop to
/// stop accepting new submissions, it does not itself complete anything
/// in flight. Actually completing transfers (on flush, reset, or
/// teardown) means calling the host adapter's cancel/flush primitives,
/// which drives the refcount back down through [`Connection::release`].
pub struct Connection {
    in_flight: Mutex<u64>,
    drained: Condvar,
    canceling_requests: AtomicBool,
    pub stats: Stats,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
            canceling_requests: AtomicBool::new(false),
            stats: Stats::new(),
        }
    }

    /// Takes a reference for one in-flight transfer.
    pub fn acquire(&self) {
        let mut count = self.in_flight.lock().unwrap();
        *count += 1;
    }

    /// Releases a reference, waking anyone waiting on
    /// [`Connection::wait_until_drained`] once the count reaches zero.
    pub fn release(&self) {
        let mut count = self.in_flight.lock().unwrap();
        assert!(*count > 0, "released more references than were acquired");
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub fn in_flight_count(&self) -> u64 {
        *self.in_flight.lock().unwrap()
    }

    /// Blocks until every acquired reference has been released. Used at
    /// teardown before unmapping the ring.
    pub fn wait_until_drained(&self) {
        let mut count = self.in_flight.lock().unwrap();
        while *count > 0 {
            count = self.drained.wait(count).unwrap();
        }
    }

    pub fn begin_cancelling(&self) {
        self.canceling_requests.store(true, Ordering::SeqCst);
    }

    pub fn end_cancelling(&self) {
        self.canceling_requests.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelling(&self) -> bool {
        self.canceling_requests.load(Ordering::SeqCst)
    }

    /// Enters the reset bracket (`pre_reset`): sets the cancelling flag so
    /// the dispatch loop stops accepting new submissions for the duration
    /// and records one reset. The companion `post_reset` half is the
    /// returned guard's `Drop`, which runs on every exit path from the
    /// reset operation, including an early return.
    pub fn begin_reset(&self) -> ResetGuard<'_> {
        self.begin_cancelling();
        self.stats.record_reset();
        ResetGuard { connection: self }
    }
}

/// Bracket returned by [`Connection::begin_reset`]. Clears the cancelling
/// flag on drop.
pub struct ResetGuard<'a> {
    connection: &'a Connection,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.connection.end_cancelling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_until_drained_returns_immediately_with_nothing_in_flight() {
        let conn = Connection::new();
        conn.wait_until_drained();
    }

    #[test]
    fn wait_until_drained_blocks_until_every_reference_is_released() {
        let conn = Arc::new(Connection::new());
        conn.acquire();
        conn.acquire();

        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.wait_until_drained())
        };

        thread::sleep(Duration::from_millis(20));
        conn.release();
        conn.release();
        waiter.join().unwrap();
    }

    #[test]
    fn stats_split_by_direction_and_transfer_type() {
        let stats = Stats::new();
        stats.record_request(TransferType::Bulk, true, 512);
        stats.record_request(TransferType::Control, false, 8);

        assert_eq!(stats.in_requests(), 1);
        assert_eq!(stats.in_bandwidth(), 512);
        assert_eq!(stats.out_requests(), 1);
        assert_eq!(stats.out_bandwidth(), 8);
        assert_eq!(stats.bulk_requests(), 1);
        assert_eq!(stats.control_requests(), 1);
    }

    #[test]
    fn cancelling_flag_is_advisory_and_toggles_independently_of_refcount() {
        let conn = Connection::new();
        assert!(!conn.is_cancelling());
        conn.begin_cancelling();
        assert!(conn.is_cancelling());
        conn.acquire();
        conn.end_cancelling();
        assert!(!conn.is_cancelling());
        assert_eq!(conn.in_flight_count(), 1);
    }

    #[test]
    fn reset_bracket_sets_the_flag_and_records_a_reset_until_the_guard_drops() {
        let conn = Connection::new();
        assert_eq!(conn.stats.resets(), 0);
        {
            let _guard = conn.begin_reset();
            assert!(conn.is_cancelling());
        }
        assert!(!conn.is_cancelling());
        assert_eq!(conn.stats.resets(), 1);
    }

    #[test]
    fn reset_bracket_clears_the_flag_even_on_an_early_return() {
        fn reset_then_bail(conn: &Connection) -> Result<(), ()> {
            let _guard = conn.begin_reset();
            Err(())
        }
        let conn = Connection::new();
        let _ = reset_then_bail(&conn);
        assert!(!conn.is_cancelling());
        assert_eq!(conn.stats.resets(), 1);
    }
}
