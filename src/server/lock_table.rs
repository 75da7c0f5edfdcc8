//! Per-path reader/writer lock map with lazy creation.
//!
//! `global_mtx` (here a plain [`std::sync::Mutex`]) protects only the map
//! itself; the critical section is a single hashmap lookup-or-insert and
//! never spans an `.await`, so a blocking mutex is the right tool even in
//! async code. The per-path locks themselves are `tokio::sync::RwLock`s so
//! that an owned guard can be handed to a caller and held across RPC
//! boundaries (chunked transfer state), which a `std::sync::RwLock` guard
//! cannot do because it borrows from the lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl LockTable {
    pub fn new() -> LockTable {
        LockTable::default()
    }

    fn entry(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().expect("lock table mutex poisoned");
        locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    /// Acquires the reader lock for `path`, returning an owned guard that
    /// can be stored in the chunk-transfer table and released later.
    pub async fn acquire_read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        let lock = self.entry(path);
        lock.read_owned().await
    }

    /// Acquires the writer lock for `path`, returning an owned guard.
    pub async fn acquire_write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        let lock = self.entry(path);
        lock.write_owned().await
    }

    /// Drops the map entry for `path`. Safe to call even while a guard for
    /// that path is still held elsewhere: the `Arc` keeps the `RwLock`
    /// alive for existing holders, and the next `entry()` call will lazily
    /// recreate a fresh (unlocked) entry.
    pub fn forget(&self, path: &Path) {
        self.locks.lock().expect("lock table mutex poisoned").remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readers_do_not_block_each_other() {
        let table = LockTable::new();
        let path = PathBuf::from("a.txt");
        let g1 = table.acquire_read(&path).await;
        let g2 = tokio::time::timeout(std::time::Duration::from_millis(50), table.acquire_read(&path)).await;
        assert!(g2.is_ok());
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn writer_excludes_reader() {
        let table = LockTable::new();
        let path = PathBuf::from("a.txt");
        let _writer = table.acquire_write(&path).await;
        let reader = tokio::time::timeout(std::time::Duration::from_millis(50), table.acquire_read(&path)).await;
        assert!(reader.is_err(), "reader should have blocked on the writer");
    }
}
