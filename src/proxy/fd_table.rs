//! Client-facing descriptor allocation.
//!
//! This is the thin, external-collaborator layer the design doc calls out
//! as out of scope for the cache engine itself: it only mints and recycles
//! the numeric descriptors a client sees, and maps them back to an
//! [`OpenHandle`]. File descriptors are minted at 1024 and up; directory
//! descriptors live in a separate, low range so the two can never collide.

use super::handle::OpenHandle;
use crossbeam_queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

const FILE_FD_BASE: i32 = 1024;
const DIR_FD_BASE: i32 = 1;
const DIR_FD_LIMIT: i32 = FILE_FD_BASE;
const FREE_LIST_CAPACITY: usize = 4096;

struct Allocator {
    next: AtomicI32,
    free: ArrayQueue<i32>,
}

impl Allocator {
    fn new(base: i32) -> Allocator {
        Allocator { next: AtomicI32::new(base), free: ArrayQueue::new(FREE_LIST_CAPACITY) }
    }

    fn alloc(&self) -> i32 {
        if let Some(fd) = self.free.pop() {
            return fd;
        }
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn free(&self, fd: i32) {
        let _ = self.free.push(fd);
    }
}

/// Maps client-visible descriptors to open handles.
pub struct FdTable {
    files: Allocator,
    dirs: Allocator,
    handles: Mutex<HashMap<i32, OpenHandle>>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable { files: Allocator::new(FILE_FD_BASE), dirs: Allocator::new(DIR_FD_BASE), handles: Mutex::new(HashMap::new()) }
    }

    /// Allocates a fresh descriptor for `handle` and registers it.
    pub fn insert(&self, handle: OpenHandle) -> i32 {
        let fd = if handle.is_directory() { self.dirs.alloc() } else { self.files.alloc() };
        self.handles.lock().unwrap().insert(fd, handle);
        fd
    }

    /// Removes and returns the handle for `fd`, freeing the descriptor for
    /// reuse. `None` if `fd` is unknown.
    pub fn remove(&self, fd: i32) -> Option<OpenHandle> {
        let handle = self.handles.lock().unwrap().remove(&fd)?;
        if fd < DIR_FD_LIMIT {
            self.dirs.free(fd);
        } else {
            self.files.free(fd);
        }
        Some(handle)
    }

    pub fn contains(&self, fd: i32) -> bool {
        self.handles.lock().unwrap().contains_key(&fd)
    }
}

impl Default for FdTable {
    fn default() -> FdTable {
        FdTable::new()
    }
}
