use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Buffers that grew beyond this are dropped instead of returned to the pool.
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_MAX_POOLED: usize = 16;

/// A small pool of reusable byte buffers used while encoding wire payloads.
///
/// Each model owns its own pool. Buffers are handed out as [`PooledBuffer`] guards
/// and go back to the pool when the guard is dropped, so every exit path releases
/// them. Oversized buffers are not retained, which keeps the occasional huge
/// payload from pinning memory for the life of the pool.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_retained_capacity: usize,
    max_pooled: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED_CAPACITY, DEFAULT_MAX_POOLED)
    }
}

impl BufferPool {
    pub fn new(max_retained_capacity: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_retained_capacity,
            max_pooled,
        }
    }

    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_default();
        PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_retained_capacity {
            return;
        }
        buffer.clear();
        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < self.max_pooled {
                buffers.push(buffer);
            }
        }
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop.
        self.buffer.as_ref().unwrap_or(&EMPTY)
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

static EMPTY: Vec<u8> = Vec::new();
