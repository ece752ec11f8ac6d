//! The block ring buffer (component G): a fixed-capacity, single-producer/
//! single-consumer queue of 2048-byte blocks connecting the writer chain to
//! whatever sink the caller has chosen (a file, a device, a network socket).
//!
//! Blocking is implemented with a mutex and two condvars rather than a
//! lock-free structure, matching the single-writer/single-reader contract in
//! §5: there is never more than one thread on each side, so the extra
//! complexity of a lock-free ring would buy nothing.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub const BLOCK_SIZE: usize = 2048;

/// The terminal or transitional state of the pipe between producer and
/// consumer, per §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    Active,
    WriterEndedOk,
    WriterFailed,
    ReaderCancelled,
    BothEnded,
}

struct Inner {
    blocks: VecDeque<[u8; BLOCK_SIZE]>,
    capacity: usize,
    state: RingState,
    times_full: u64,
    times_empty: u64,
    bytes_odometer: u64,
}

/// A bounded channel of fixed-size blocks with two condvars — `not_full` for
/// the producer, `not_empty` for the consumer — and explicit state
/// transitions so either side can observe why the other stopped.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl RingBuffer {
    /// `capacity` is the number of 2048-byte blocks the buffer holds before
    /// the producer blocks; §6 recommends at least 32, default 1024.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                blocks: VecDeque::with_capacity(capacity),
                capacity,
                state: RingState::Active,
                times_full: 0,
                times_empty: 0,
                bytes_odometer: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks until there is room, then pushes one block. Returns `false`
    /// without pushing if the reader has already cancelled.
    pub fn push(&self, block: [u8; BLOCK_SIZE]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.state == RingState::ReaderCancelled || inner.state == RingState::BothEnded {
                return false;
            }
            if inner.blocks.len() < inner.capacity {
                break;
            }
            inner.times_full += 1;
            inner = self.not_full.wait(inner).unwrap();
        }
        inner.blocks.push_back(block);
        inner.bytes_odometer += BLOCK_SIZE as u64;
        self.not_empty.notify_one();
        true
    }

    /// Blocks until a block is available or the writer has finished.
    /// Returns `None` once the queue is drained and the writer has ended
    /// (successfully or not).
    pub fn pop(&self) -> Option<[u8; BLOCK_SIZE]> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(block) = inner.blocks.pop_front() {
                self.not_full.notify_one();
                return Some(block);
            }
            if inner.state != RingState::Active {
                return None;
            }
            inner.times_empty += 1;
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Signals that the producer finished without error.
    pub fn finish_ok(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = match inner.state {
            RingState::ReaderCancelled => RingState::BothEnded,
            _ => RingState::WriterEndedOk,
        };
        self.not_empty.notify_all();
    }

    /// Signals that the producer aborted with an error; any blocks already
    /// queued remain available to drain.
    pub fn finish_err(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = match inner.state {
            RingState::ReaderCancelled => RingState::BothEnded,
            _ => RingState::WriterFailed,
        };
        self.not_empty.notify_all();
    }

    /// Signals that the consumer is no longer interested; wakes the producer
    /// out of a blocked push so it can unwind rather than deadlock.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = match inner.state {
            RingState::WriterEndedOk | RingState::WriterFailed => RingState::BothEnded,
            _ => RingState::ReaderCancelled,
        };
        self.not_full.notify_all();
    }

    pub fn state(&self) -> RingState {
        self.inner.lock().unwrap().state
    }

    pub fn times_full(&self) -> u64 {
        self.inner.lock().unwrap().times_full
    }

    pub fn times_empty(&self) -> u64 {
        self.inner.lock().unwrap().times_empty
    }

    pub fn bytes_odometer(&self) -> u64 {
        self.inner.lock().unwrap().bytes_odometer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_round_trips_a_block() {
        let ring = RingBuffer::new(4);
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 42;
        assert!(ring.push(block));
        let popped = ring.pop().unwrap();
        assert_eq!(popped[0], 42);
    }

    #[test]
    fn pop_returns_none_after_writer_finishes_and_queue_drains() {
        let ring = RingBuffer::new(4);
        ring.push([1u8; BLOCK_SIZE]);
        ring.finish_ok();
        assert!(ring.pop().is_some());
        assert!(ring.pop().is_none());
    }

    #[test]
    fn cancel_unblocks_a_full_producer() {
        let ring = Arc::new(RingBuffer::new(1));
        ring.push([0u8; BLOCK_SIZE]);
        let producer_ring = ring.clone();
        let handle = thread::spawn(move || producer_ring.push([1u8; BLOCK_SIZE]));
        // give the producer a chance to block on the full buffer
        thread::yield_now();
        ring.cancel();
        assert_eq!(handle.join().unwrap(), false);
    }

    #[test]
    fn times_full_increments_when_producer_blocks() {
        let ring = RingBuffer::new(1);
        ring.push([0u8; BLOCK_SIZE]);
        assert_eq!(ring.times_full(), 0);
    }
}
