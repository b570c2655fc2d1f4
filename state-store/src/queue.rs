//! Two-queue job scheduling
//!
//! Writes (reducers) and reads (state callbacks) wait in separate FIFO
//! queues. The drain loop in [`Store`](crate::Store) always empties the
//! write queue before taking a single read, so a read that enqueues a write
//! sees that write applied before the next read runs:
//!
//! ```text
//! read A { write a }      writes: []     reads: [A, B]
//! read B { write b }      run A    ->    writes: [a]    reads: [B]
//!                         apply a  ->    writes: []     reads: [B]
//!                         run B    ->    writes: [b]    reads: []
//!                         apply b  ->    writes: []     reads: []
//! ```
//!
//! Every job is stamped with the position at which it was accepted.

use std::collections::VecDeque;

/// A pure state transition. Evaluated twice in debug mode.
pub type Reducer<S> = Box<dyn Fn(&S) -> S + Send>;

/// A callback observing the state at the time it is dequeued
pub type ReadBlock<S> = Box<dyn FnOnce(&S) + Send>;

/// Pending reducers and read callbacks, in acceptance order
pub(crate) struct JobQueue<S> {
    writes: VecDeque<(u64, Reducer<S>)>,
    reads: VecDeque<(u64, ReadBlock<S>)>,
    accepted: u64,
}

impl<S> JobQueue<S> {
    pub(crate) fn new() -> Self {
        Self {
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            accepted: 0,
        }
    }

    /// Enqueue a reducer, returning its acceptance position
    pub(crate) fn enqueue_write(&mut self, reducer: Reducer<S>) -> u64 {
        let position = self.next_position();
        self.writes.push_back((position, reducer));
        position
    }

    /// Enqueue a read callback, returning its acceptance position
    pub(crate) fn enqueue_read(&mut self, block: ReadBlock<S>) -> u64 {
        let position = self.next_position();
        self.reads.push_back((position, block));
        position
    }

    /// Take every pending reducer at once
    ///
    /// Returns `None` without allocating when nothing is queued.
    pub(crate) fn take_writes(&mut self) -> Option<VecDeque<(u64, Reducer<S>)>> {
        if self.writes.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.writes))
    }

    pub(crate) fn dequeue_read(&mut self) -> Option<(u64, ReadBlock<S>)> {
        self.reads.pop_front()
    }

    pub(crate) fn pending(&self) -> (usize, usize) {
        (self.writes.len(), self.reads.len())
    }

    pub(crate) fn clear(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }

    fn next_position(&mut self) -> u64 {
        self.accepted += 1;
        self.accepted
    }
}
