//! Reusable sample-buffer allocator.
//!
//! Buffers are filed by capacity class (a power of two, in samples). A buffer
//! handed out by [`BufferPool::get`] is owned by the caller until it is passed
//! back to [`BufferPool::put`], so a returned buffer can't be touched again and
//! can't be returned twice. Leaks show up in [`BufferPool::outstanding`].

use alloc::vec::Vec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;

use crate::buffer::Buffer;

#[derive(Debug)]
pub struct BufferPool {
    channels: usize,
    free: Mutex<HashMap<usize, Vec<Buffer>>>,
    outstanding: AtomicUsize,
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            free: Mutex::new(HashMap::new()),
            outstanding: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Borrow an empty buffer that holds at least `capacity` samples.
    ///
    /// Recycles a previously returned buffer of the same class if one is
    /// available; otherwise allocates.
    pub fn get(&self, capacity: usize) -> Buffer {
        let class = capacity_class(capacity);
        self.outstanding.fetch_add(1, Ordering::Relaxed);

        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&class)
            .and_then(Vec::pop);

        recycled.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Buffer::with_capacity(self.channels, class)
        })
    }

    /// Return a buffer for reuse.
    pub fn put(&self, mut buffer: Buffer) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);

        // Grown buffers are filed under the largest class they still satisfy.
        let capacity = buffer.capacity();
        if capacity == 0 || buffer.channels() != self.channels {
            return;
        }
        buffer.clear();
        let class = 1usize << (usize::BITS - 1 - capacity.leading_zeros());

        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(class)
            .or_default()
            .push(buffer);
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffers handed out and not yet returned
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Buffers allocated over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers currently idle in the pool
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[inline]
fn capacity_class(capacity: usize) -> usize {
    capacity.max(1).next_power_of_two()
}
