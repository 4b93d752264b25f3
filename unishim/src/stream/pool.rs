//! Pooled copy buffers.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use unishim_shared::constants::io as io_const;

/// A shared free list of fixed-size copy buffers.
///
/// Cloning is cheap; clones share the same free list.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buf_size: usize,
    max_idle: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buf_size,
                max_idle,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Borrow a buffer. It returns to the pool when the guard is dropped.
    pub fn get(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buf_size].into_boxed_slice());
        PooledBuf {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(io_const::BUF_SIZE, io_const::POOL_MAX_IDLE)
    }
}

pub struct PooledBuf {
    buf: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let mut free = self.pool.free.lock();
            if free.len() < self.pool.max_idle {
                free.push(buf);
            }
        }
    }
}
