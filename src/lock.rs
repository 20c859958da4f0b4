//! Lock acquisition with poison recovery.
//!
//! A panicking task poisons std locks. Every guarded section in this crate
//! is a complete synchronous mutation between await points, so the maps
//! behind a poisoned lock are still internally consistent; the extension
//! traits below recover the guard and log the site instead of letting the
//! panic cascade into unrelated callers.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) trait RwLockExt<T> {
    fn read_recovered(&self, site: &'static str) -> RwLockReadGuard<'_, T>;
    fn write_recovered(&self, site: &'static str) -> RwLockWriteGuard<'_, T>;
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_recovered(&self, site: &'static str) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            warn!(
                site,
                access = "read",
                "recovering store state poisoned by an earlier panic"
            );
            poisoned.into_inner()
        })
    }

    fn write_recovered(&self, site: &'static str) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            warn!(
                site,
                access = "write",
                "recovering store state poisoned by an earlier panic"
            );
            poisoned.into_inner()
        })
    }
}

pub(crate) trait MutexExt<T> {
    fn lock_recovered(&self, site: &'static str) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_recovered(&self, site: &'static str) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            warn!(
                site,
                access = "lock",
                "recovering store state poisoned by an earlier panic"
            );
            poisoned.into_inner()
        })
    }
}
