//! Per-key write locks for the content store.
//!
//! Each content key gets its own async mutex, created on first use and
//! removed from the table as soon as nobody holds or waits on it. Writers
//! of different keys never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

#[derive(Debug)]
struct Entry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters. The entry is removed when this reaches zero.
    users: usize,
}

type Table = HashMap<String, Entry>;

#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    // std mutex: only held for table lookups, never across an await
    table: Mutex<Table>,
}

impl KeyLocks {
    /// Wait for exclusive access to `key`.
    ///
    /// Cancel-safe: dropping the returned future while it waits releases
    /// its interest in the entry.
    pub(crate) async fn acquire(self: &Arc<Self>, key: &str) -> KeyGuard {
        let (checkout, mutex) = self.check_out(key);
        let guard = mutex.lock_owned().await;
        KeyGuard {
            guard,
            _checkout: checkout,
        }
    }

    /// Number of keys with a live lock entry.
    pub(crate) fn len(&self) -> usize {
        self.table().len()
    }

    fn check_out(self: &Arc<Self>, key: &str) -> (Checkout, Arc<tokio::sync::Mutex<()>>) {
        let mut table = self.table();
        let entry = table.entry(key.to_string()).or_insert_with(|| Entry {
            mutex: Arc::default(),
            users: 0,
        });
        entry.users += 1;
        let checkout = Checkout {
            locks: Arc::clone(self),
            key: key.to_string(),
        };
        (checkout, Arc::clone(&entry.mutex))
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        // The table is always left consistent, so a poisoned lock is still usable.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One registered user of a table entry, holding or waiting.
#[derive(Debug)]
struct Checkout {
    locks: Arc<KeyLocks>,
    key: String,
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let mut table = self.locks.table();
        if let Some(entry) = table.get_mut(&self.key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                table.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key. Reclaims the table entry on drop when
/// no other task is waiting for it.
#[derive(Debug)]
pub(crate) struct KeyGuard {
    // Field order matters: unlock before giving up the entry.
    guard: OwnedMutexGuard<()>,
    _checkout: Checkout,
}

impl KeyGuard {
    #[cfg(test)]
    fn is_locked(&self) -> bool {
        tokio::sync::OwnedMutexGuard::mutex(&self.guard).try_lock().is_err()
    }
}
