//! Scoped reader/writer lock acquisition.
//!
//! Guards release on every exit path. A poisoned lock is recovered instead of
//! surfaced: the crate never panics while holding one of its locks, so the
//! protected state is still consistent.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

pub trait RwLockExt<T> {
    /// Shared access; many readers may hold it together.
    fn read_scoped(&self) -> RwLockReadGuard<'_, T>;

    /// Exclusive access.
    fn write_scoped(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_scoped(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            warn!("Recovering poisoned read lock");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_scoped(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            warn!("Recovering poisoned write lock");
            PoisonError::into_inner(poisoned)
        })
    }
}

pub trait MutexExt<T> {
    fn lock_scoped(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_scoped(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            warn!("Recovering poisoned mutex");
            PoisonError::into_inner(poisoned)
        })
    }
}
