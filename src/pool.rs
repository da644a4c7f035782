//! A bounded pool of reusable objects.
//!
//! Neither [`Pool::acquire`] nor [`Pool::release`] ever block: if the pool is contended or empty
//! a fresh object is constructed, and if it is contended or full a returned object is dropped.
use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use crate::rules::Evaluator;

/// Objects that can be handed to another borrower after [`reset`](Poolable::reset).
pub trait Poolable: Send {
    /// Clear any per-use state before the object goes back into the pool.
    fn reset(&mut self);
}

/// Counters describing pool effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects taken from the pool.
    pub reused: u64,
    /// Objects constructed because the pool was empty or contended.
    pub created: u64,
    /// Objects dropped on release because the pool was full or contended.
    pub discarded: u64,
}

pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    factory: fn() -> T,
    reused: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
}

/// Pool of rule evaluators shared by request handlers.
pub type EvaluatorPool = Pool<Evaluator>;

impl<T: Poolable> Pool<T> {
    /// Create a pool holding at most `capacity` idle objects, pre-warmed to full capacity.
    pub fn new(capacity: usize, factory: fn() -> T) -> Pool<T> {
        Pool {
            items: Mutex::new((0..capacity).map(|_| factory()).collect()),
            capacity,
            factory,
            reused: AtomicU64::new(0),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an object out of the pool, constructing one if none is available.
    pub fn acquire(&self) -> T {
        let pooled = self.items.try_lock().ok().and_then(|mut items| items.pop());
        match pooled {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Return an object. It is reset first, and dropped if the pool has no room for it.
    pub fn release(&self, mut item: T) {
        item.reset();
        if let Ok(mut items) = self.items.try_lock() {
            if items.len() < self.capacity {
                items.push(item);
                return;
            }
        }
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Borrow an object that returns itself to the pool on drop.
    pub fn get(&self) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            item: Some(self.acquire()),
        }
    }

    /// Number of idle objects currently held.
    pub fn idle(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl EvaluatorPool {
    pub fn with_capacity(capacity: usize) -> EvaluatorPool {
        Pool::new(capacity, Evaluator::new)
    }
}

/// RAII guard returned by [`Pool::get`].
pub struct Pooled<'a, T: Poolable> {
    pool: &'a Pool<T>,
    // Always `Some` until dropped.
    item: Option<T>,
}

impl<T: Poolable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item is present until drop")
    }
}

impl<T: Poolable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item is present until drop")
    }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Pool, PoolStats, Poolable};

    #[derive(Default)]
    struct Scratch {
        used: bool,
    }

    impl Poolable for Scratch {
        fn reset(&mut self) {
            self.used = false;
        }
    }

    #[test]
    fn reuses_released_items() {
        let pool = Pool::new(2, Scratch::default);
        assert_eq!(pool.idle(), 2);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert_eq!(
            pool.stats(),
            PoolStats {
                reused: 2,
                created: 1,
                discarded: 0
            }
        );

        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn items_are_reset_on_release() {
        let pool = Pool::new(1, Scratch::default);
        {
            let mut item = pool.get();
            item.used = true;
        }
        assert!(!pool.acquire().used);
    }

    #[test]
    fn zero_capacity_never_blocks() {
        let pool = Pool::new(0, Scratch::default);
        let item = pool.acquire();
        pool.release(item);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn concurrent_borrowers() {
        let pool = Arc::new(Pool::new(4, Scratch::default));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut item = pool.get();
                        assert!(!item.used);
                        item.used = true;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle() <= 4);
    }
}
