//! # Scratch Buffer Pool
//!
//! Size-classed pool of byte buffers used by the streaming codecs for their scratch space.
//!
//! The pool is an ordinary value: whoever builds a codec hands it a [`BufferPool`] (cheap to
//! clone, all clones share the same storage). There is no process-wide pool.
//!
//! A buffer is checked out with [`BufferPool::checkout`] and goes back to its size class when
//! the [`PooledBuffer`] is dropped. Dropping consumes the guard, so a buffer is returned exactly
//! once and cannot be touched afterwards.
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Size classes for buffer pooling (powers of 4).
const SIZE_CLASSES: &[usize] = &[
    256,    // 256 B
    1024,   // 1 KB
    4096,   // 4 KB
    16384,  // 16 KB
    65536,  // 64 KB
    262144, // 256 KB
];

/// Maximum number of idle buffers kept per size class.
const MAX_BUFFERS_PER_CLASS: usize = 16;

/// A pool of reusable byte buffers organized by size class.
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl Default for PoolInner {
    fn default() -> Self {
        Self {
            classes: SIZE_CLASSES.iter().map(|_| Mutex::new(Vec::new())).collect(),
        }
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out a zero-filled buffer of exactly `len` bytes.
    ///
    /// The backing allocation comes from the smallest size class that fits, or is freshly
    /// allocated when the class is empty or `len` exceeds the largest class.
    pub fn checkout(&self, len: usize) -> PooledBuffer {
        let mut buffer = match class_index(len) {
            Some(idx) => self.inner.classes[idx]
                .lock()
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(SIZE_CLASSES[idx])),
            None => Vec::with_capacity(len),
        };

        buffer.clear();
        buffer.resize(len, 0);

        PooledBuffer {
            buffer,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers currently held by the pool.
    pub fn idle(&self) -> usize {
        self.inner.classes.iter().map(|class| class.lock().len()).sum()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .finish()
    }
}

impl PoolInner {
    fn give_back(&self, buffer: Vec<u8>) {
        let capacity = buffer.capacity();
        if capacity > SIZE_CLASSES[SIZE_CLASSES.len() - 1] {
            return;
        }
        // A buffer serves the largest class it can fully hold.
        let Some(idx) = SIZE_CLASSES.iter().rposition(|&size| size <= capacity) else {
            return;
        };

        let mut class = self.classes[idx].lock();
        if class.len() < MAX_BUFFERS_PER_CLASS {
            class.push(buffer);
        }
    }
}

fn class_index(len: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&size| size >= len)
}

/// A buffer checked out from a [`BufferPool`], returned to it on drop.
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_has_requested_length() {
        let pool = BufferPool::new();
        let buffer = pool.checkout(6);

        assert_eq!(buffer.len(), 6);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn dropped_buffer_is_reused() {
        let pool = BufferPool::new();
        assert_eq!(pool.idle(), 0);

        let mut buffer = pool.checkout(100);
        buffer[0] = 42;
        drop(buffer);
        assert_eq!(pool.idle(), 1);

        let buffer = pool.checkout(200);
        assert_eq!(pool.idle(), 0);
        assert_eq!(buffer[0], 0, "reused buffers are zeroed");
    }

    #[test]
    fn oversized_buffers_are_not_pooled() {
        let pool = BufferPool::new();
        drop(pool.checkout(1024 * 1024));

        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn clones_share_storage() {
        let pool = BufferPool::new();
        let clone = pool.clone();

        drop(clone.checkout(10));
        assert_eq!(pool.idle(), 1);
    }
}
