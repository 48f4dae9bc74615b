use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::RingError;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded, multi-producer single-consumer queue carrying host-side
/// transfer completions from whichever thread the host adapter calls back
/// on into the dispatch worker's single consuming task.
///
/// This generalizes the push/pop/spinning contract of a byte-oriented
/// ring buffer to typed values: capacity is a count of items rather than
/// bytes, and there is no `TooLarge` push error since every item is the
/// same size by construction. `close` wakes every blocked waiter so a
/// worker shutting down doesn't block forever on a queue nothing will
/// ever push to again.
pub struct CompletionQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> CompletionQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "completion queue capacity must be nonzero");
        CompletionQueue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Pushes without blocking, failing if the queue is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), RingError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(RingError::Closed);
        }
        if state.items.len() >= self.capacity {
            return Err(RingError::Full);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pushes, blocking while the queue is full. Returns `Closed` if the
    /// queue is closed before room becomes available.
    pub fn push_blocking(&self, item: T) -> Result<(), RingError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(RingError::Closed);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self.not_full.wait(state).unwrap();
        }
    }

    /// Pops without blocking. `Ok(None)` means empty-but-open; `Err(Closed)`
    /// means empty and no further item will ever arrive.
    pub fn try_pop(&self) -> Result<Option<T>, RingError> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.items.pop_front() {
            drop(state);
            self.not_full.notify_one();
            return Ok(Some(item));
        }
        if state.closed {
            Err(RingError::Closed)
        } else {
            Ok(None)
        }
    }

    /// Pops, blocking until an item is available. Returns `Closed` once
    /// the queue is closed and drained.
    pub fn pop_blocking(&self) -> Result<T, RingError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(RingError::Closed);
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Marks the queue closed and wakes every waiter. Items already queued
    /// remain poppable; `pop_blocking`/`try_pop` only report `Closed` once
    /// drained.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
