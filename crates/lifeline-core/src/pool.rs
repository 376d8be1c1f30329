//! Bounded pool of reusable instances.
//!
//! The pool keeps one instance in a fast slot and up to `capacity - 1` more
//! in a bounded overflow channel. Instances returned past that bound are
//! dropped. [`Pooled`] hands an instance back on every exit path.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Fast-slot plus bounded-overflow object pool.
pub struct ObjectPool<T> {
    fast: Mutex<Option<T>>,
    overflow_tx: Sender<T>,
    overflow_rx: Receiver<T>,
    capacity: usize,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
}

impl<T: Send> ObjectPool<T> {
    /// Create a pool retaining at most `capacity` idle instances.
    pub fn new(capacity: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let capacity = capacity.max(1);
        let (overflow_tx, overflow_rx) = crossbeam_channel::bounded(capacity - 1);
        Self {
            fast: Mutex::new(None),
            overflow_tx,
            overflow_rx,
            capacity,
            factory: Box::new(factory),
            reset: None,
        }
    }

    /// Run `reset` on every instance handed back to the pool.
    pub fn with_reset(mut self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Take an idle instance, or build a new one.
    pub fn get(&self) -> T {
        if let Some(value) = self.fast.lock().take() {
            return value;
        }
        match self.overflow_rx.try_recv() {
            Ok(value) => value,
            Err(_) => (self.factory)(),
        }
    }

    /// Hand an instance back.
    pub fn put(&self, mut value: T) {
        if let Some(reset) = &self.reset {
            reset(&mut value);
        }
        {
            let mut fast = self.fast.lock();
            if fast.is_none() {
                *fast = Some(value);
                return;
            }
        }
        if self.overflow_tx.try_send(value).is_err() {
            debug!(capacity = self.capacity, "pool full, instance discarded");
        }
    }

    /// Take an instance that returns itself to the pool when dropped.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        Pooled {
            value: Some(self.get()),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle instances currently held.
    pub fn idle(&self) -> usize {
        usize::from(self.fast.lock().is_some()) + self.overflow_rx.len()
    }

    /// Maximum number of idle instances retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow_rx.len())
            .finish()
    }
}

/// Scoped pool instance; goes back to its pool on drop.
pub struct Pooled<T: Send> {
    value: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Send> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the value out.
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value accessed after release"),
        }
    }
}

impl<T: Send> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled value accessed after release"),
        }
    }
}

impl<T: Send> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put(value);
        }
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pool(capacity: usize) -> (Arc<ObjectPool<Vec<u8>>>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let pool = ObjectPool::new(capacity, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::with_capacity(16)
        })
        .with_reset(|buf: &mut Vec<u8>| buf.clear());
        (Arc::new(pool), built)
    }

    #[test]
    fn reuses_returned_instances() {
        let (pool, built) = counting_pool(2);
        let mut buf = pool.get();
        buf.push(7);
        pool.put(buf);
        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discards_past_capacity() {
        let (pool, _) = counting_pool(2);
        let items: Vec<_> = (0..4).map(|_| pool.get()).collect();
        for item in items {
            pool.put(item);
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn scoped_acquire_returns_on_drop() {
        let (pool, built) = counting_pool(4);
        {
            let mut a = pool.acquire();
            a.push(1);
            let _b = pool.acquire();
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);
        let _again = pool.acquire();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
