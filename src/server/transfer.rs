//! Chunk-transfer table: `chunk_id -> (open handle, path, held lock)`.
//!
//! A transfer table entry is live iff the corresponding per-path lock is
//! held: a download entry retains the reader lock's owned guard, an upload
//! entry retains the writer lock's owned guard. Dropping the entry (on
//! final chunk or cancel) drops the guard and releases the lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::fs::File;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

pub struct DownloadEntry {
    pub file: File,
    pub path: PathBuf,
    pub _guard: OwnedRwLockReadGuard<()>,
}

pub struct UploadEntry {
    pub file: File,
    pub path: PathBuf,
    pub _guard: OwnedRwLockWriteGuard<()>,
}

pub enum TransferEntry {
    Download(DownloadEntry),
    Upload(UploadEntry),
}

#[derive(Default)]
pub struct TransferTable {
    next_id: AtomicI32,
    entries: Mutex<HashMap<i32, TransferEntry>>,
}

impl TransferTable {
    pub fn new() -> TransferTable {
        TransferTable::default()
    }

    /// Mints a fresh, globally unique, monotonic chunk id.
    pub fn next_chunk_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn insert(&self, chunk_id: i32, entry: TransferEntry) {
        self.entries.lock().await.insert(chunk_id, entry);
    }

    pub async fn take(&self, chunk_id: i32) -> Option<TransferEntry> {
        self.entries.lock().await.remove(&chunk_id)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
