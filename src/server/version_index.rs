//! Server-side `path -> monotonic timestamp` map.
//!
//! Timestamps are in-memory only and increment once per successful Upload
//! commit (invariant: the sequence of timestamps handed out for one path is
//! strictly increasing). They are reset whenever the server process
//! restarts, which is an explicit non-goal of this design (no crash
//! recovery of server state).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct VersionIndex {
    timestamps: Mutex<HashMap<PathBuf, i64>>,
}

impl VersionIndex {
    pub fn new() -> VersionIndex {
        VersionIndex::default()
    }

    /// Walks `root` recursively, assigning timestamp 0 to every regular
    /// file found, establishing the server's initial version state.
    pub fn scan_root(root: &Path) -> std::io::Result<VersionIndex> {
        let index = VersionIndex::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                    index.timestamps.lock().expect("version index poisoned").insert(relative, 0);
                }
            }
        }
        Ok(index)
    }

    /// The current timestamp for `path`, or `None` if the server has no
    /// record of this path (never uploaded, or deleted).
    pub fn get(&self, path: &Path) -> Option<i64> {
        self.timestamps.lock().expect("version index poisoned").get(path).copied()
    }

    /// Installs a fresh timestamp after a successful Upload commit, caller
    /// having already computed the strictly-increasing next value.
    pub fn bump(&self, path: &Path) -> i64 {
        let mut timestamps = self.timestamps.lock().expect("version index poisoned");
        let next = timestamps.get(path).copied().unwrap_or(-1) + 1;
        timestamps.insert(path.to_path_buf(), next);
        next
    }

    /// Drops the entry for `path`, used by Delete.
    pub fn remove(&self, path: &Path) {
        self.timestamps.lock().expect("version index poisoned").remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_strictly_increasing() {
        let index = VersionIndex::new();
        let path = PathBuf::from("a.txt");
        assert_eq!(index.bump(&path), 0);
        assert_eq!(index.bump(&path), 1);
        assert_eq!(index.bump(&path), 2);
    }

    #[test]
    fn remove_clears_entry() {
        let index = VersionIndex::new();
        let path = PathBuf::from("a.txt");
        index.bump(&path);
        assert!(index.get(&path).is_some());
        index.remove(&path);
        assert!(index.get(&path).is_none());
    }
}
