//! A pool of reusable byte buffers for streaming response bodies.
//!
//! Streaming upstream responses allocate a fresh buffer per chunk unless
//! something hands them a recycled one. `BufferPool` is a bounded stack of
//! `BytesMut` buffers, grounded on the same "bounded `Vec` behind a `Mutex`,
//! reject past capacity" shape as `EndpointSet`'s registry, sized for the
//! allocation churn streaming fanout produces rather than for correctness.

use bytes::BytesMut;
use std::sync::Mutex;

/// Default capacity, in bytes, of a freshly allocated buffer.
const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Take a buffer from the pool, or allocate a fresh one if empty.
    pub fn acquire(&self) -> BytesMut {
        let mut buffers = self.buffers.lock().expect("buffer pool poisoned");
        buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity))
    }

    /// Return a buffer to the pool for reuse, clearing its contents first.
    /// Dropped instead of pooled once `max_pooled` is reached.
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut buffers = self.buffers.lock().expect("buffer pool poisoned");
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    /// Number of buffers currently held in reserve.
    pub fn len(&self) -> usize {
        self.buffers.lock().expect("buffer pool poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_on_empty_pool_allocates() {
        let pool = BufferPool::new(4);
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), DEFAULT_BUFFER_CAPACITY);
        assert!(pool.is_empty());
    }

    #[test]
    fn released_buffer_is_reused_and_cleared() {
        let pool = BufferPool::new(4);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        pool.release(buf);
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(pool.is_empty());
    }

    #[test]
    fn release_past_capacity_drops_excess() {
        let pool = BufferPool::new(2);
        for _ in 0..5 {
            pool.release(BytesMut::new());
        }
        assert_eq!(pool.len(), 2);
    }
}
