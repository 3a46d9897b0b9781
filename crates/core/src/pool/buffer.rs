//! Reusable byte-buffer pool bounding peak heap pressure during large
//! transfers and transcodes.

use std::sync::Mutex;

/// Default slot capacity: 10 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// Default number of retained slots.
pub const DEFAULT_POOL_CAPACITY: usize = 100;

/// A non-blocking pool of fixed-capacity `Vec<u8>` buffers.
///
/// `get` always succeeds: when the free list is empty a fresh buffer is
/// allocated, so contention grows the heap instead of blocking callers.
/// `put` keeps the pool homogeneous by dropping buffers whose capacity
/// does not match the configured slot size, and drops anything beyond the
/// retention target. Buffers are lent by value, so a caller cannot return
/// the same buffer twice.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each.
    ///
    /// Non-positive values fall back to the defaults.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        let capacity = if capacity == 0 {
            DEFAULT_POOL_CAPACITY
        } else {
            capacity
        };

        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            buffer_size,
            capacity,
        }
    }

    /// Borrow a buffer with at least the configured capacity and zero
    /// length.
    pub fn get(&self) -> Vec<u8> {
        if let Some(buf) = self.free.lock().expect("buffer pool poisoned").pop() {
            return buf;
        }
        Vec::with_capacity(self.buffer_size)
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is cleared before it becomes lendable again. Foreign
    /// buffers (capacity mismatch) and returns beyond the retention
    /// target are dropped.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() != self.buffer_size {
            return;
        }
        buf.clear();

        let mut free = self.free.lock().expect("buffer pool poisoned");
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Borrow a one-off buffer of exactly `size` bytes capacity.
    ///
    /// Standard-size requests are served from the pool; anything else is
    /// freshly allocated.
    pub fn get_sized(&self, size: usize) -> Vec<u8> {
        if size == self.buffer_size {
            return self.get();
        }
        Vec::with_capacity(size)
    }

    /// Return a buffer obtained through [`get_sized`](Self::get_sized).
    ///
    /// Only standard-size buffers are retained.
    pub fn put_sized(&self, buf: Vec<u8>) {
        self.put(buf);
    }

    /// The configured per-buffer capacity in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The number of buffers currently available for lending.
    pub fn available(&self) -> usize {
        self.free.lock().expect("buffer pool poisoned").len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_empty_buffer_of_configured_capacity() {
        let pool = BufferPool::new(1024, 4);
        let buf = pool.get();
        assert_eq!(buf.len(), 0);
        assert!(buf.capacity() >= 1024);
    }

    #[test]
    fn buffers_are_reused_after_put() {
        let pool = BufferPool::new(1024, 4);
        let mut buf = pool.get();
        buf.extend_from_slice(b"payload");
        let ptr = buf.as_ptr();

        pool.put(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.get();
        assert_eq!(again.as_ptr(), ptr);
        // Length was reset on return.
        assert_eq!(again.len(), 0);
    }

    #[test]
    fn never_blocks_under_contention() {
        let pool = BufferPool::new(64, 2);
        // Drain well past the retention target; every get still succeeds.
        let borrowed: Vec<_> = (0..10).map(|_| pool.get()).collect();
        assert_eq!(borrowed.len(), 10);
        for buf in borrowed {
            pool.put(buf);
        }
        // Only `capacity` buffers were retained.
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn foreign_buffers_are_discarded() {
        let pool = BufferPool::new(1024, 4);
        pool.put(Vec::with_capacity(4096));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn sized_requests_bypass_the_pool() {
        let pool = BufferPool::new(1024, 4);
        let small = pool.get_sized(32);
        assert!(small.capacity() >= 32);
        pool.put_sized(small);
        // Non-standard size is not retained.
        assert_eq!(pool.available(), 0);

        let standard = pool.get_sized(1024);
        pool.put_sized(standard);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn zero_configuration_falls_back_to_defaults() {
        let pool = BufferPool::new(0, 0);
        assert_eq!(pool.buffer_size(), DEFAULT_BUFFER_SIZE);
    }
}
