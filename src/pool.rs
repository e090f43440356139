//! Pooled payload allocator backing the io queue.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};

/// Thread-safe free-list allocator handing out fixed-length payload blocks.
///
/// Blocks return themselves to the pool on drop.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.to_owned(),
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Acquire a zeroed block of exactly `len` bytes, reusing a free block
    /// with sufficient capacity when one is available.
    pub fn acquire(&self, len: usize) -> PoolBlock {
        let mut data = {
            let mut free = self.inner.free.lock().unwrap();
            match free.iter().position(|block| block.capacity() >= len) {
                Some(index) => free.swap_remove(index),
                None => Vec::with_capacity(len),
            }
        };

        data.clear();
        data.resize(len, 0);

        log::trace!(target: "pool", "{}: acquire block({})", self.inner.name, len);

        PoolBlock {
            data,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of blocks currently parked in the free list.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }
}

/// One pooled payload block.
pub struct PoolBlock {
    data: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl Deref for PoolBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PoolBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            log::trace!(target: "pool", "{}: release block({})", pool.name, self.data.len());
            pool.free.lock().unwrap().push(std::mem::take(&mut self.data));
        }
    }
}
