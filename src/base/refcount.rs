//! Atomic reference-counted handles.
//!
//! `RefCounted<T>` is the shared-ownership handle behind both bootstrap
//! types. Cloning acquires a reference, dropping releases one, and the
//! wrapped value's `Drop` runs exactly once when the last reference goes.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

pub struct RefCounted<T> {
    inner: Arc<T>,
}

impl<T> RefCounted<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Takes another reference to the same value.
    pub fn acquire(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Gives up this reference.
    ///
    /// Returns `true` if it was the last one, in which case the value has
    /// been destroyed by the time this returns.
    pub fn release(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }

    /// Number of live strong references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Non-owning back-reference that does not keep the value alive.
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("ref_count", &self.ref_count())
            .field("value", &*self.inner)
            .finish()
    }
}

/// Weak counterpart of [`RefCounted`].
pub struct WeakRef<T> {
    inner: Weak<T>,
}

impl<T> WeakRef<T> {
    /// Re-acquires a strong reference if the value is still alive.
    pub fn upgrade(&self) -> Option<RefCounted<T>> {
        self.inner.upgrade().map(|inner| RefCounted { inner })
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_acquire_release() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = RefCounted::new(Tracked(drops.clone()));
        let second = handle.acquire();
        assert_eq!(handle.ref_count(), 2);

        assert!(!second.release());
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert!(handle.release());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_release_destroys_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = RefCounted::new(Tracked(drops.clone()));
        let last_count = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let local = handle.acquire();
                let last_count = last_count.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        local.acquire().release();
                    }
                    if local.release() {
                        last_count.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        if handle.release() {
            last_count.fetch_add(1, Ordering::SeqCst);
        }
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(last_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_weak_does_not_keep_alive() {
        let handle = RefCounted::new(5u32);
        let weak = handle.downgrade();
        assert_eq!(weak.upgrade().map(|h| *h), Some(5));
        drop(handle);
        assert!(weak.upgrade().is_none());
    }
}
