//! Reentrant lock with a scoped guard.
//!
//! [`ThreadLock`] serialises access to a resource shared across threads
//! (the append-only log files in [`logging`](crate::logging)). A thread that
//! already holds the lock may take it again without deadlocking; the lock is
//! released when the outermost [`ThreadLocker`] is dropped, which also
//! happens while unwinding out of a panicking block.
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

#[derive(Debug, Default)]
pub struct ThreadLock {
    inner: ReentrantMutex<()>,
}

/// Held acquisition of a [`ThreadLock`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ThreadLocker<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl ThreadLock {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
        }
    }

    pub fn lock(&self) -> ThreadLocker<'_> {
        ThreadLocker {
            _guard: self.inner.lock(),
        }
    }

    /// Runs `f` while holding the lock.
    pub fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _locker = self.lock();
        f()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::Arc,
        thread,
    };

    use super::*;

    #[test]
    fn reentrant_acquire_does_not_deadlock() {
        let lock = ThreadLock::new();
        let outer = lock.lock();
        let value = lock.locked(|| 7);
        drop(outer);

        assert_eq!(value, 7);
        assert!(!lock.is_locked());
    }

    #[test]
    fn released_when_block_panics() {
        let lock = ThreadLock::new();
        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            lock.locked(|| -> u8 { panic!("inside critical section") })
        }));

        assert!(res.is_err());
        assert!(!lock.is_locked());
    }

    #[test]
    fn excludes_other_threads() {
        let lock = Arc::new(ThreadLock::new());
        let counter = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _locker = lock.lock();
                        counter.lock().push(i);
                        counter.lock().push(i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let seen = counter.lock();
        assert_eq!(seen.len(), 400);
        assert!(seen.chunks(2).all(|pair| pair[0] == pair[1]));
    }
}
