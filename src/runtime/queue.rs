//! Bounded FIFO of pending responses for one session.
//!
//! The front item is the one being written; everything behind it waits.
//! Exactly one write is in flight per session, so the queue order is the
//! order in which responses reach the wire.

use bytes::Bytes;
use std::collections::VecDeque;

/// Maximum number of responses a session will queue before it stops reading.
pub const QUEUE_LIMIT: usize = 8192;

/// What to do once a work item has been fully written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Advance the queue and keep the connection open.
    KeepAlive,
    /// Close the connection, discarding anything still queued.
    Close,
}

/// A queued response: encoded bytes, write progress, and its continuation.
#[derive(Debug, Clone)]
pub struct WorkItem {
    payload: Bytes,
    written: usize,
    completion: Completion,
}

impl WorkItem {
    pub fn new(payload: Bytes, completion: Completion) -> Self {
        Self {
            payload,
            written: 0,
            completion,
        }
    }

    /// Bytes not yet written.
    pub fn remaining(&self) -> &[u8] {
        &self.payload[self.written..]
    }

    /// Record `n` more bytes as written. Returns `true` when the item is done.
    pub fn advance(&mut self, n: usize) -> bool {
        self.written = (self.written + n).min(self.payload.len());
        self.is_done()
    }

    pub fn is_done(&self) -> bool {
        self.written == self.payload.len()
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    items: VecDeque<T>,
    limit: usize,
}

impl<T> WorkQueue<T> {
    /// # Panics
    /// Panics if `limit` is zero.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "queue limit must be positive");
        Self {
            items: VecDeque::new(),
            limit,
        }
    }

    /// Append an item. Returns `true` if the queue was empty, meaning the new
    /// item is now the front and its write should begin immediately.
    pub fn enqueue(&mut self, item: T) -> bool {
        self.items.push_back(item);
        self.items.len() == 1
    }

    /// Pop the finished front item.
    ///
    /// Returns `true` if the queue was at its limit before the pop, i.e. the
    /// session had stopped reading and may resume now.
    pub fn on_write_complete(&mut self) -> bool {
        debug_assert!(!self.items.is_empty(), "write completed on empty queue");
        let was_full = self.is_full();
        self.items.pop_front();
        was_full
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drop everything still queued. Returns how many items were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new(QUEUE_LIMIT)
    }
}
