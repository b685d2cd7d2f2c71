//! Fixed-capacity line buffer shared between one producer context and the
//! render scheduler.
//!
//! `push` never waits for space: when the buffer is full the oldest line is
//! evicted to admit the new one. The internal lock is only ever held for a
//! `VecDeque` operation, so neither side can stall the other for longer than
//! that.

use crate::line::LogLine;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct BoundedLineQueue {
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
    dropped: AtomicU64,
}

impl BoundedLineQueue {
    /// Create a queue holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a line, evicting the oldest one first if the queue is full.
    pub fn push(&self, line: LogLine) {
        let mut lines = self.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        lines.push_back(line);
    }

    /// Remove and return every buffered line in arrival order.
    pub fn drain_all(&self) -> Vec<LogLine> {
        let mut lines = self.lock();
        lines.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of lines evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // A producer that panicked mid-push cannot leave the deque in a torn
    // state, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
