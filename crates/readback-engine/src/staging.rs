//! CPU-visible staging buffers that completed transfers land in.
//!
//! # Staging Buffer Pool
//!
//! Released buffers go back to a free list and are handed out again to later
//! transfers of a similar size, so a steady stream of same-sized readbacks
//! stops allocating after the first few frames.
//!
//! ```ignore
//! let manager = StagingBufferManager::new(&EngineConfig::default());
//!
//! let buffer = manager.acquire(400 * 300 * 4);
//! // ... the backend copies the surface into `buffer` ...
//! manager.release(buffer);
//! ```
//!
//! A buffer is owned by exactly one slot at a time; ownership moves by value,
//! so two live slots can never share one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use readback_core::profiling::profile_function;

use crate::config::EngineConfig;

/// A CPU-side destination for one transfer.
///
/// Storage is rounded up for reuse; [`len`](Self::len) is the size of the
/// transfer currently using it. Fresh buffers are zeroed, reused ones are not.
#[derive(Debug)]
pub struct StagingBuffer {
    id: u64,
    storage: Box<[u8]>,
    len: usize,
}

impl StagingBuffer {
    /// Create a zeroed buffer with room for `len` bytes, rounded up to the
    /// next power of two for better reuse.
    pub(crate) fn new(id: u64, len: usize) -> Self {
        let capacity = len.max(1).next_power_of_two();
        Self {
            id,
            storage: vec![0u8; capacity].into_boxed_slice(),
            len,
        }
    }

    /// Allocator-unique id of this buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }
}

/// A pool of staging buffers for reuse.
pub struct StagingBufferPool {
    /// Available buffers
    available: Vec<StagingBuffer>,
    max_pooled_bytes: usize,
    max_pooled_buffers: usize,
}

impl StagingBufferPool {
    /// Create a pool that keeps at most `max_pooled_buffers` buffers totalling
    /// at most `max_pooled_bytes`.
    pub fn new(max_pooled_bytes: usize, max_pooled_buffers: usize) -> Self {
        Self {
            available: Vec::new(),
            max_pooled_bytes,
            max_pooled_buffers,
        }
    }

    /// Take the smallest pooled buffer that fits `len` bytes.
    pub fn take(&mut self, len: usize) -> Option<StagingBuffer> {
        profile_function!();
        let mut best_idx = None;
        let mut best_size = usize::MAX;

        for (idx, buffer) in self.available.iter().enumerate() {
            if buffer.capacity() >= len && buffer.capacity() < best_size {
                best_idx = Some(idx);
                best_size = buffer.capacity();
            }
        }

        best_idx.map(|idx| {
            let mut buffer = self.available.swap_remove(idx);
            buffer.len = len;
            buffer
        })
    }

    /// Return a buffer to the pool. Returns `false` when the pool is at its
    /// limits and the buffer was freed instead.
    pub fn recycle(&mut self, buffer: StagingBuffer) -> bool {
        let fits_count = self.available.len() < self.max_pooled_buffers;
        let fits_bytes = self.total_available_size() + buffer.capacity() <= self.max_pooled_bytes;
        if fits_count && fits_bytes {
            self.available.push(buffer);
            true
        } else {
            false
        }
    }

    /// Clear all buffers from the pool.
    pub fn clear(&mut self) {
        self.available.clear();
    }

    /// Get the number of available buffers.
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Get the total size of available buffers.
    pub fn total_available_size(&self) -> usize {
        self.available.iter().map(StagingBuffer::capacity).sum()
    }
}

/// Counters of the staging buffer manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    /// Buffers currently owned by slots.
    pub outstanding: usize,
    /// Buffers sitting in the free list.
    pub pooled_buffers: usize,
    /// Bytes sitting in the free list.
    pub pooled_bytes: usize,
    /// Buffers allocated fresh since creation.
    pub allocations: u64,
    /// Acquisitions served from the free list.
    pub reuses: u64,
}

/// Thread-safe owner of the staging pool.
pub struct StagingBufferManager {
    pool: Mutex<StagingBufferPool>,
    next_id: AtomicU64,
    outstanding: AtomicUsize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl StagingBufferManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pool: Mutex::new(StagingBufferPool::new(
                config.max_pooled_bytes,
                config.max_pooled_buffers,
            )),
            next_id: AtomicU64::new(1),
            outstanding: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// Get a buffer of at least `len` bytes, reusing a pooled one if possible.
    pub fn acquire(&self, len: usize) -> StagingBuffer {
        profile_function!();
        let reused = self.pool.lock().take(len);
        self.outstanding.fetch_add(1, Ordering::Relaxed);

        match reused {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(buffer = buffer.id(), len, "reusing staging buffer");
                buffer
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.allocations.fetch_add(1, Ordering::Relaxed);
                let buffer = StagingBuffer::new(id, len);
                tracing::trace!(buffer = id, len, capacity = buffer.capacity(), "allocated staging buffer");
                buffer
            }
        }
    }

    /// Give a buffer back.
    ///
    /// Only call this once the GPU can no longer write into it: after the
    /// owning slot settled, or when the copy was never submitted.
    pub fn release(&self, buffer: StagingBuffer) {
        let id = buffer.id();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if !self.pool.lock().recycle(buffer) {
            tracing::trace!(buffer = id, "staging pool full, freeing buffer");
        }
    }

    /// Free every pooled buffer.
    pub fn trim(&self) {
        self.pool.lock().clear();
    }

    pub fn stats(&self) -> StagingStats {
        let pool = self.pool.lock();
        StagingStats {
            outstanding: self.outstanding.load(Ordering::Relaxed),
            pooled_buffers: pool.available_count(),
            pooled_bytes: pool.total_available_size(),
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StagingBufferManager {
        StagingBufferManager::new(&EngineConfig::default())
    }

    #[test]
    fn test_staging_pool() {
        let manager = manager();

        // Allocate a buffer
        let buffer1 = manager.acquire(1024);
        assert_eq!(buffer1.len(), 1024);
        assert_eq!(manager.stats().outstanding, 1);
        assert_eq!(manager.stats().pooled_buffers, 0);

        // Return it to pool
        let first_id = buffer1.id();
        manager.release(buffer1);
        assert_eq!(manager.stats().pooled_buffers, 1);

        // Allocate again - should reuse
        let buffer2 = manager.acquire(1000);
        assert_eq!(buffer2.id(), first_id);
        assert_eq!(buffer2.len(), 1000);
        assert_eq!(manager.stats().reuses, 1);
        assert_eq!(manager.stats().allocations, 1);

        manager.release(buffer2);
        assert_eq!(manager.stats().outstanding, 0);
    }

    #[test]
    fn test_staging_pool_size_matching() {
        let mut pool = StagingBufferPool::new(usize::MAX, 16);

        // Add buffers of different sizes
        pool.recycle(StagingBuffer::new(1, 512));
        pool.recycle(StagingBuffer::new(2, 1024));
        pool.recycle(StagingBuffer::new(3, 2048));

        // Request 600 bytes - should get the 1024 buffer (smallest that fits)
        let buffer = pool.take(600).unwrap();
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.len(), 600);
        assert_eq!(pool.available_count(), 2);

        assert!(pool.take(4096).is_none());
    }

    #[test]
    fn test_pool_limits_free_excess_buffers() {
        let mut pool = StagingBufferPool::new(2048, 2);
        assert!(pool.recycle(StagingBuffer::new(1, 1024)));
        assert!(pool.recycle(StagingBuffer::new(2, 1024)));
        assert!(!pool.recycle(StagingBuffer::new(3, 16)), "buffer count limit");

        let mut pool = StagingBufferPool::new(1024, 8);
        assert!(pool.recycle(StagingBuffer::new(1, 1024)));
        assert!(!pool.recycle(StagingBuffer::new(2, 1)), "byte limit");
    }

    #[test]
    fn test_concurrent_buffers_are_distinct() {
        let manager = manager();
        let buffers: Vec<_> = (0..32).map(|i| manager.acquire(64 + i)).collect();

        let mut ids: Vec<_> = buffers.iter().map(StagingBuffer::id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), buffers.len());

        let mut ptrs: Vec<_> = buffers.iter().map(|b| b.as_slice().as_ptr()).collect();
        ptrs.sort_unstable();
        ptrs.dedup();
        assert_eq!(ptrs.len(), buffers.len());
    }

    #[test]
    fn test_fresh_buffers_are_zeroed() {
        let manager = manager();
        let buffer = manager.acquire(300);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buffer.capacity(), 512);
    }

    #[test]
    fn test_trim_empties_pool() {
        let manager = manager();
        let buffer = manager.acquire(64);
        manager.release(buffer);
        manager.trim();
        assert_eq!(manager.stats().pooled_buffers, 0);
        assert_eq!(manager.stats().pooled_bytes, 0);
    }
}
