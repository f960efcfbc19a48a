//! Bounded pools of reusable inflaters and deflaters.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use flate2::{Compress, Compression, Decompress};
use parking_lot::Mutex;

/// A raw DEFLATE codec that can be reset for reuse.
pub(crate) trait Flater: Send + 'static {
    fn create() -> Self;
    fn recycle(&mut self);
}

impl Flater for Decompress {
    fn create() -> Self {
        Decompress::new(false)
    }

    fn recycle(&mut self) {
        Decompress::reset(self, false);
    }
}

impl Flater for Compress {
    fn create() -> Self {
        Compress::new(Compression::default(), false)
    }

    fn recycle(&mut self) {
        Compress::reset(self);
    }
}

/// Idle codecs waiting for reuse. Borrowing never blocks; returns beyond
/// the capacity are dropped.
#[derive(Debug)]
pub(crate) struct FlaterPool<T> {
    idle: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Flater> FlaterPool<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            capacity,
        })
    }

    /// Take an idle codec or create a fresh one.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let item = self.idle.lock().pop().unwrap_or_else(T::create);
        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut item: T) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            item.recycle();
            idle.push(item);
        }
    }

    /// Drop all idle codecs.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    #[cfg(test)]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A codec borrowed from a [`FlaterPool`], returned when dropped.
#[derive(Debug)]
pub(crate) struct Pooled<T: Flater> {
    item: Option<T>,
    pool: Arc<FlaterPool<T>>,
}

impl<T: Flater> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item out.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Flater> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Flater> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

/// The inflater and deflater pools of one filesystem.
#[derive(Debug)]
pub(crate) struct Pools {
    pub inflaters: Arc<FlaterPool<Decompress>>,
    pub deflaters: Arc<FlaterPool<Compress>>,
}

impl Pools {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inflaters: FlaterPool::new(capacity),
            deflaters: FlaterPool::new(capacity),
        })
    }

    pub fn clear(&self) {
        self.inflaters.clear();
        self.deflaters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_up_to_capacity() {
        let pool = FlaterPool::<Decompress>::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        assert_eq!(pool.idle_count(), 0);
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle_count(), 2);

        let _d = pool.acquire();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_recycled_deflater_starts_fresh() {
        let pools = Pools::new(1);
        let compress = || {
            let mut deflater = pools.deflaters.acquire();
            let mut out = vec![0u8; 64];
            deflater
                .compress(b"abcabcabc", &mut out, flate2::FlushCompress::Finish)
                .unwrap();
            out
        };
        let first = compress();
        assert_eq!(pools.deflaters.idle_count(), 1);
        assert_eq!(compress(), first);
    }

    #[test]
    fn test_clear() {
        let pools = Pools::new(4);
        drop(pools.inflaters.acquire());
        drop(pools.deflaters.acquire());
        pools.clear();
        assert_eq!(pools.inflaters.idle_count(), 0);
        assert_eq!(pools.deflaters.idle_count(), 0);
    }
}
