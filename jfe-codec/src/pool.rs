//! Pooled byte buffers with guaranteed return
//!
//! [`BufferPool`] is an explicit, cloneable service; clones share one free
//! list. Buffers are rented as [`PooledBuffer`] guards that hand their
//! allocation back on drop, on every exit path including errors.

use jfe_format::{JfeError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 32;

/// Default capacity above which returned buffers are dropped instead of kept.
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
    max_retained_capacity: usize,
}

/// Thread-safe pool of reusable byte buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED, DEFAULT_MAX_RETAINED_CAPACITY)
    }
}

impl BufferPool {
    /// Pool keeping at most `max_retained` idle buffers of at most
    /// `max_retained_capacity` bytes each.
    pub fn new(max_retained: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_retained)),
                max_retained,
                max_retained_capacity,
            }),
        }
    }

    /// Rent an empty buffer with capacity for at least `min_capacity` bytes.
    pub fn rent(&self, min_capacity: usize) -> PooledBuffer {
        let reused = {
            let mut free = self.inner.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.iter()
                .position(|b| b.capacity() >= min_capacity)
                .map(|idx| free.swap_remove(idx))
        };

        let mut buf = reused.unwrap_or_default();
        buf.clear();
        buf.reserve(min_capacity);

        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    /// Rent a buffer of exactly `len` zeroed bytes.
    pub fn rent_zeroed(&self, len: usize) -> PooledBuffer {
        let mut buffer = self.rent(len);
        buffer.resize(len, 0);
        buffer
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > self.inner.max_retained_capacity {
            return;
        }
        buf.clear();
        let mut free = self.inner.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.inner.max_retained {
            free.push(buf);
        }
    }
}

/// A rented buffer; returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Grow a read buffer holding `used` live bytes at its front.
    ///
    /// The new length doubles the current one, grows by at least
    /// `min_increment` past `used`, and never exceeds `max_len`. A buffer
    /// already at the cap cannot grow and yields [`JfeError::TokenTooLarge`].
    pub fn grow(&mut self, used: usize, min_increment: usize, max_len: usize) -> Result<()> {
        let new_len = next_buffer_len(self.buf.len(), used, min_increment, max_len)?;
        tracing::trace!(from = self.buf.len(), to = new_len, "growing read buffer");

        let mut grown = self.pool.rent_zeroed(new_len);
        grown[..used].copy_from_slice(&self.buf[..used]);
        std::mem::swap(&mut self.buf, &mut grown.buf);
        Ok(())
    }

    /// Take the bytes out, leaving an empty buffer behind.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl std::io::Write for PooledBuffer {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}

/// Next read-buffer length under the doubling policy.
pub fn next_buffer_len(
    current: usize,
    used: usize,
    min_increment: usize,
    max_len: usize,
) -> Result<usize> {
    let target = current
        .saturating_mul(2)
        .max(used.saturating_add(min_increment));
    let capped = target.min(max_len);
    if current >= capped {
        return Err(JfeError::TokenTooLarge { max: max_len });
    }
    Ok(capped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new(4, 1 << 20);
        {
            let mut a = pool.rent(100);
            a.extend_from_slice(b"payload");
        }
        assert_eq!(pool.idle(), 1);

        let b = pool.rent(50);
        assert!(b.is_empty());
        assert!(b.capacity() >= 100);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn returned_on_error_paths() {
        let pool = BufferPool::default();
        let failing = |pool: &BufferPool| -> Result<()> {
            let _scratch = pool.rent(64);
            Err(JfeError::Cancelled)
        };
        assert!(failing(&pool).is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn oversized_and_surplus_buffers_dropped() {
        let pool = BufferPool::new(1, 1024);
        drop(pool.rent(4096));
        assert_eq!(pool.idle(), 0);

        let a = pool.rent(16);
        let b = pool.rent(16);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn growth_policy() {
        assert_eq!(next_buffer_len(8192, 8192, 4096, 1 << 23).unwrap(), 16384);
        assert_eq!(next_buffer_len(16, 16, 4096, 1 << 23).unwrap(), 4112);
        assert_eq!(next_buffer_len(6 << 20, 6 << 20, 4096, 8 << 20).unwrap(), 8 << 20);
        assert!(matches!(
            next_buffer_len(8 << 20, 8 << 20, 4096, 8 << 20),
            Err(JfeError::TokenTooLarge { max }) if max == 8 << 20
        ));
    }

    #[test]
    fn grow_preserves_live_bytes() {
        let pool = BufferPool::default();
        let mut buf = pool.rent_zeroed(8);
        buf.copy_from_slice(b"abcdefgh");
        buf.grow(8, 8, 64).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..8], b"abcdefgh");
    }

    #[test]
    fn shared_across_threads() {
        let pool = BufferPool::default();
        std::thread::scope(|s| {
            for _ in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for i in 0..100 {
                        let mut b = pool.rent(i);
                        b.push(1);
                    }
                });
            }
        });
        assert!(pool.idle() <= DEFAULT_MAX_RETAINED);
    }
}
