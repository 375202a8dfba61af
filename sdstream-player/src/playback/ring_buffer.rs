//! Lock-protected ring buffer for decoded samples
//!
//! Single-producer single-consumer circular store shared between the fill
//! scheduler (producer context) and the playback consumer (output context).
//!
//! Design:
//! - Backed by a `ringbuf` heap ring split into its producer and consumer
//!   halves; capacity is fixed at construction
//! - Both halves sit under one mutex so an occupancy check and the copy that
//!   depends on it happen together
//! - `available` is the authoritative occupancy, kept explicitly next to the
//!   ring so both sides read one value
//! - The lock covers one bounded copy, never a decode or a storage read
//! - `pop` is all-or-nothing: a short ring reports a shortfall and leaves
//!   its state untouched

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of a [`RingBuffer::pop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop {
    /// The requested count was copied out
    Full,
    /// Not enough samples; nothing was consumed
    Shortfall { available: usize },
}

/// Ring buffer statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    pub capacity: usize,
    pub available: usize,
    pub write_index: usize,
    pub read_index: usize,
}

impl RingBufferStats {
    /// Fill level (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        self.available as f32 / self.capacity as f32
    }
}

struct RingState<T> {
    prod: HeapProd<T>,
    cons: HeapCons<T>,
    /// Slot the next pushed sample lands in
    write_index: usize,
    /// Slot the next popped sample comes from
    read_index: usize,
    available: usize,
}

/// Fixed-capacity circular buffer with lock-protected counters
pub struct RingBuffer<T> {
    capacity: usize,
    state: Mutex<RingState<T>>,
}

impl<T: Copy> RingBuffer<T> {
    /// Allocate a ring holding `capacity` elements.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let (prod, cons) = HeapRb::<T>::new(capacity).split();
        Self {
            capacity,
            state: Mutex::new(RingState {
                prod,
                cons,
                write_index: 0,
                read_index: 0,
                available: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Free slots
    pub fn free(&self) -> usize {
        self.capacity - self.lock().available
    }

    /// Copy in as many samples as fit and return how many were stored.
    ///
    /// Never blocks on space. Samples beyond the free space are dropped; the
    /// caller compares the return value with `samples.len()` to count them.
    pub fn push(&self, samples: &[T]) -> usize {
        let mut state = self.lock();
        let count = state.prod.push_slice(samples);
        state.write_index = (state.write_index + count) % self.capacity;
        state.available += count;
        count
    }

    /// Fill `out` completely, or consume nothing.
    pub fn pop(&self, out: &mut [T]) -> Pop {
        let mut state = self.lock();
        if state.cons.occupied_len() < out.len() {
            return Pop::Shortfall {
                available: state.available,
            };
        }
        let taken = Self::take(&mut state, self.capacity, out);
        debug_assert_eq!(taken, out.len());
        Pop::Full
    }

    /// Copy out whatever is available, up to `out.len()`, and return the count.
    ///
    /// Used only to flush the tail of a stream whose producer has finished.
    pub fn drain_into(&self, out: &mut [T]) -> usize {
        let mut state = self.lock();
        Self::take(&mut state, self.capacity, out)
    }

    fn take(state: &mut RingState<T>, capacity: usize, out: &mut [T]) -> usize {
        let count = state.cons.pop_slice(out);
        state.read_index = (state.read_index + count) % capacity;
        state.available -= count;
        count
    }

    /// Drop every stored sample and rewind. Only called while no stream is
    /// attached.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.cons.clear();
        state.write_index = 0;
        state.read_index = 0;
        state.available = 0;
    }

    pub fn stats(&self) -> RingBufferStats {
        let state = self.lock();
        RingBufferStats {
            capacity: self.capacity,
            available: state.available,
            write_index: state.write_index,
            read_index: state.read_index,
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("write_index", &state.write_index)
            .field("read_index", &state.read_index)
            .finish()
    }
}
