use std::sync::{Arc, PoisonError, RwLock};

/// Shared, read-mostly state with snapshot-swap updates.
///
/// Readers take an `Arc` snapshot and never hold the lock while working with
/// it. Writers copy the current value, modify the copy and swap it in, so a
/// reader sees either the old value or the new one, never a half-done update.
pub struct Shared<T> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(value))),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> R {
        f(&self.snapshot())
    }
}

impl<T: Clone> Shared<T> {
    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = T::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
