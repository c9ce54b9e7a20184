//! Fixed-size buffer pool.
//!
//! # Responsibilities
//! - Hand out 1 MiB scratch buffers for body copies
//! - Keep released buffers for reuse, up to `max_idle`
//! - Never hand out a buffer of any other length

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Capacity of every pooled buffer.
pub const BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
    max_idle: usize,
    allocated: AtomicU64,
}

/// Shared pool of equally sized byte buffers.
///
/// Cloning is cheap; clones share the same idle set.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Pool of [`BUFFER_SIZE`] buffers keeping at most `max_idle` for reuse.
    pub fn new(max_idle: usize) -> Self {
        Self::with_buffer_size(BUFFER_SIZE, max_idle)
    }

    pub fn with_buffer_size(buffer_size: usize, max_idle: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be non-zero");
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                buffer_size,
                max_idle,
                allocated: AtomicU64::new(0),
            }),
        }
    }

    /// Take an idle buffer, or allocate a new one.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let buf = match reused {
            Some(buf) => buf,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("proxy_buffer_pool_allocations_total").increment(1);
                vec![0u8; self.inner.buffer_size].into_boxed_slice()
            }
        };

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Return a buffer for reuse. Buffers of the wrong length, or beyond
    /// `max_idle`, are dropped.
    pub fn release(&self, buf: Box<[u8]>) {
        if buf.len() != self.inner.buffer_size {
            return;
        }

        let mut idle = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.inner.max_idle {
            idle.push(buf);
        }
        metrics::gauge!("proxy_buffer_pool_idle").set(idle.len() as f64);
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Buffers currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total buffers ever allocated by this pool.
    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

/// A buffer owned by one copy. Returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
