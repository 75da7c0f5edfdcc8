//! The single piece of mutable state the cache engine guards with one
//! mutex: per-path [`FileRecord`]s, their server timestamps, an LRU over
//! [`VersionKey`]s, and the occupancy byte counter.
//!
//! All file IO here operates on paths produced by [`CacheState::version_path`]
//! under `cache_root`; none of it ever touches the file tree the server owns.

use super::version::{FileRecord, VersionId, VersionKey, VersionMeta, NO_VERSION};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What happened to an in-flight writer version when its handle closed.
pub enum WriterOutcome {
    /// The upload completed and the server assigned `server_ts`.
    Committed { server_ts: i64 },
    /// The upload failed partway through; the version is left registered
    /// (not installed as the reader) and is swept by ordinary LRU pressure
    /// once nothing references it anymore.
    Divergent,
}

pub struct CacheState {
    records: HashMap<PathBuf, FileRecord>,
    timestamps: HashMap<PathBuf, i64>,
    lru: Vec<VersionKey>,
    occupancy: u64,
    capacity: u64,
    cache_root: PathBuf,
}

impl CacheState {
    /// Sweeps `cache_root` clean (see the design doc's resolution on stale
    /// on-disk version files surviving a proxy restart) and returns an
    /// empty cache over it.
    pub async fn new(cache_root: PathBuf, capacity: u64) -> std::io::Result<CacheState> {
        sweep_cache_root(&cache_root).await?;
        Ok(CacheState {
            records: HashMap::new(),
            timestamps: HashMap::new(),
            lru: Vec::new(),
            occupancy: 0,
            capacity,
            cache_root,
        })
    }

    pub fn version_path(&self, path: &Path, version_id: VersionId) -> PathBuf {
        if version_id == 0 {
            self.cache_root.join(path)
        } else {
            let mut name = path.to_string_lossy().into_owned();
            name.push_str(&version_id.to_string());
            self.cache_root.join(name)
        }
    }

    pub fn get_timestamp(&self, path: &Path) -> i64 {
        self.timestamps.get(path).copied().unwrap_or(crate::wire::NO_EXIST)
    }

    pub fn clear_reader_version(&mut self, path: &Path) {
        if let Some(record) = self.records.get_mut(path) {
            record.reader_version_id = NO_VERSION;
        }
        self.timestamps.remove(path);
    }

    fn touch(&mut self, key: VersionKey) {
        if let Some(pos) = self.lru.iter().position(|k| *k == key) {
            self.lru.remove(pos);
        }
        self.lru.push(key);
    }

    fn adjust_ref_count(&mut self, path: &Path, version_id: VersionId, delta: i32) {
        if let Some(record) = self.records.get_mut(path) {
            if let Some(meta) = record.version_map.get_mut(&version_id) {
                meta.ref_count += delta;
            }
        }
    }

    fn release_bytes(&mut self, n: u64) {
        self.occupancy = self.occupancy.saturating_sub(n);
    }

    /// Reserves `bytes` of occupancy, evicting unreferenced versions in LRU
    /// order until there is room. Returns `false` if even evicting
    /// everything evictable would not make room (out of space).
    async fn reserve(&mut self, bytes: u64) -> bool {
        loop {
            if self.capacity.saturating_sub(self.occupancy) >= bytes {
                self.occupancy += bytes;
                return true;
            }
            let victim = self
                .lru
                .iter()
                .find(|key| {
                    self.records
                        .get(&key.path)
                        .and_then(|r| r.version_map.get(&key.version_id))
                        .map(|v| v.ref_count == 0)
                        .unwrap_or(false)
                })
                .cloned();
            match victim {
                Some(key) => self.evict_version(&key).await,
                None => return false,
            }
        }
    }

    async fn evict_version(&mut self, key: &VersionKey) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        let file_path = self.version_path(&key.path, key.version_id);
        let size = tokio::fs::metadata(&file_path).await.map(|m| m.len()).unwrap_or(0);
        let _ = tokio::fs::remove_file(&file_path).await;
        self.release_bytes(size);
        if let Some(record) = self.records.get_mut(&key.path) {
            record.version_map.remove(&key.version_id);
            if record.reader_version_id == key.version_id {
                record.reader_version_id = NO_VERSION;
                self.timestamps.remove(&key.path);
            }
        }
    }

    /// Mints the id for a to-be-downloaded version. The id is not
    /// registered in `version_map` until the download completes
    /// successfully; see [`CacheState::install_downloaded_version`].
    pub fn mint_download_version(&mut self, path: &Path) -> VersionId {
        self.records.entry(path.to_path_buf()).or_insert_with(FileRecord::new).mint_version_id()
    }

    /// Reserves `bytes` for a chunk of an in-progress download.
    pub async fn reserve_download_bytes(&mut self, bytes: u64) -> bool {
        self.reserve(bytes).await
    }

    /// Gives back occupancy reserved for a download that did not complete.
    pub fn abandon_download(&mut self, reserved_bytes: u64) {
        self.release_bytes(reserved_bytes);
    }

    /// Registers a fully-written downloaded version as the new reader
    /// version, evicting the previous reader if it is now unreferenced.
    pub async fn install_downloaded_version(&mut self, path: &Path, version_id: VersionId, server_ts: i64) {
        let old_reader = self.records.get(path).map(|r| r.reader_version_id).unwrap_or(NO_VERSION);
        let record = self.records.entry(path.to_path_buf()).or_insert_with(FileRecord::new);
        record.version_map.insert(version_id, VersionMeta { ref_count: 0 });
        record.reader_version_id = version_id;
        self.timestamps.insert(path.to_path_buf(), server_ts);
        self.touch(VersionKey::new(path.to_path_buf(), version_id));

        if old_reader != NO_VERSION && old_reader != version_id {
            let evictable = self
                .records
                .get(path)
                .and_then(|r| r.version_map.get(&old_reader))
                .map(|v| v.ref_count == 0)
                .unwrap_or(false);
            if evictable {
                self.evict_version(&VersionKey::new(path.to_path_buf(), old_reader)).await;
            }
        }
    }

    /// Opens the current reader version for reading, pinning it.
    pub async fn acquire_reader(&mut self, path: &Path) -> crate::error::Result<(tokio::fs::File, VersionId)> {
        let reader_id = self.records.get(path).map(|r| r.reader_version_id).unwrap_or(NO_VERSION);
        if reader_id == NO_VERSION {
            return Err(crate::error::CacheError::NoEntry);
        }
        let file_path = self.version_path(path, reader_id);
        let file = tokio::fs::File::open(&file_path).await?;
        self.adjust_ref_count(path, reader_id, 1);
        self.touch(VersionKey::new(path.to_path_buf(), reader_id));
        Ok((file, reader_id))
    }

    /// Unpins a reader version, evicting it immediately if it is no longer
    /// the current reader and has no other holders.
    pub async fn release_reader(&mut self, path: &Path, version_id: VersionId) {
        self.adjust_ref_count(path, version_id, -1);
        self.touch(VersionKey::new(path.to_path_buf(), version_id));
        let should_evict = self
            .records
            .get(path)
            .map(|r| r.reader_version_id != version_id && r.version_map.get(&version_id).map(|v| v.ref_count <= 0).unwrap_or(false))
            .unwrap_or(false);
        if should_evict {
            self.evict_version(&VersionKey::new(path.to_path_buf(), version_id)).await;
        }
    }

    /// Mints a writer version, copying the current reader's bytes (if any)
    /// under a reservation, and opens it read-write.
    pub async fn acquire_writer(&mut self, path: &Path) -> crate::error::Result<(tokio::fs::File, VersionId)> {
        let (new_id, reader_id) = {
            let record = self.records.entry(path.to_path_buf()).or_insert_with(FileRecord::new);
            let new_id = record.mint_version_id();
            (new_id, record.reader_version_id)
        };
        let new_path = self.version_path(path, new_id);

        if reader_id != NO_VERSION {
            let reader_path = self.version_path(path, reader_id);
            let size = tokio::fs::metadata(&reader_path).await.map(|m| m.len()).unwrap_or(0);
            // Pin the reader version before reserving: reserve() can evict
            // the LRU victim, and if R itself has ref_count == 0 it would
            // otherwise be a legal victim for its own copy's reservation.
            self.adjust_ref_count(path, reader_id, 1);
            if !self.reserve(size).await {
                self.adjust_ref_count(path, reader_id, -1);
                return Err(crate::error::CacheError::NoSpace);
            }
            let copy_result = tokio::fs::copy(&reader_path, &new_path).await;
            self.adjust_ref_count(path, reader_id, -1);
            if let Err(err) = copy_result {
                self.release_bytes(size);
                return Err(crate::error::CacheError::from(err));
            }
        } else {
            tokio::fs::File::create(&new_path).await?;
        }

        if let Some(record) = self.records.get_mut(path) {
            record.version_map.insert(new_id, VersionMeta { ref_count: 1 });
        }
        self.touch(VersionKey::new(path.to_path_buf(), new_id));
        let file = tokio::fs::OpenOptions::new().read(true).write(true).open(&new_path).await?;
        Ok((file, new_id))
    }

    /// Unpins a writer version and, on success, installs it as the new
    /// reader version (evicting the old one if it is now unreferenced).
    pub async fn finish_writer(&mut self, path: &Path, version_id: VersionId, outcome: WriterOutcome) {
        self.adjust_ref_count(path, version_id, -1);
        self.touch(VersionKey::new(path.to_path_buf(), version_id));

        if let WriterOutcome::Committed { server_ts } = outcome {
            let old_reader = self.records.get(path).map(|r| r.reader_version_id).unwrap_or(NO_VERSION);
            if let Some(record) = self.records.get_mut(path) {
                record.reader_version_id = version_id;
            }
            self.timestamps.insert(path.to_path_buf(), server_ts);

            if old_reader != NO_VERSION && old_reader != version_id {
                let evictable = self
                    .records
                    .get(path)
                    .and_then(|r| r.version_map.get(&old_reader))
                    .map(|v| v.ref_count == 0)
                    .unwrap_or(false);
                if evictable {
                    self.evict_version(&VersionKey::new(path.to_path_buf(), old_reader)).await;
                }
            }
        }
    }

    /// Clears the local view of a path after a successful server-side
    /// delete, evicting every version nothing references anymore.
    pub async fn unlink_local(&mut self, path: &Path) {
        let zero_ref_ids: Vec<VersionId> = self
            .records
            .get(path)
            .map(|r| r.version_map.iter().filter(|(_, v)| v.ref_count == 0).map(|(id, _)| *id).collect())
            .unwrap_or_default();
        if let Some(record) = self.records.get_mut(path) {
            record.reader_version_id = NO_VERSION;
        }
        self.timestamps.remove(path);
        for id in zero_ref_ids {
            self.evict_version(&VersionKey::new(path.to_path_buf(), id)).await;
        }
    }

    #[cfg(test)]
    pub fn occupancy(&self) -> u64 {
        self.occupancy
    }

    #[cfg(test)]
    pub fn lru_len(&self) -> usize {
        self.lru.len()
    }
}

async fn sweep_cache_root(cache_root: &Path) -> std::io::Result<()> {
    if !cache_root.exists() {
        tokio::fs::create_dir_all(cache_root).await?;
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(cache_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_removes_stale_version_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("report.txt1"), b"stale").await.unwrap();
        tokio::fs::write(dir.path().join("report.txt"), b"stale-base").await.unwrap();

        CacheState::new(dir.path().to_path_buf(), 1024).await.unwrap();

        assert!(!dir.path().join("report.txt1").exists());
        assert!(!dir.path().join("report.txt").exists());
    }

    #[tokio::test]
    async fn writer_with_no_reader_starts_from_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CacheState::new(dir.path().to_path_buf(), 1024).await.unwrap();
        let path = PathBuf::from("fresh.txt");

        let (mut file, version_id) = state.acquire_writer(&path).await.unwrap();
        assert_eq!(version_id, 1);
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn writer_copies_current_reader_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CacheState::new(dir.path().to_path_buf(), 1024).await.unwrap();
        let path = PathBuf::from("data.bin");

        state.install_downloaded_version(&path, 1, 10).await;
        tokio::fs::write(state.version_path(&path, 1), b"hello").await.unwrap();

        let (mut file, version_id) = state.acquire_writer(&path).await.unwrap();
        assert_eq!(version_id, 2);
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn eviction_skips_pinned_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CacheState::new(dir.path().to_path_buf(), 4).await.unwrap();
        let path = PathBuf::from("small.bin");

        state.install_downloaded_version(&path, 1, 10).await;
        tokio::fs::write(state.version_path(&path, 1), b"ab").await.unwrap();
        let (_file, reader_id) = state.acquire_reader(&path).await.unwrap();

        assert!(!state.reserve(4).await);

        state.release_reader(&path, reader_id).await;
    }

    #[tokio::test]
    async fn unlink_local_clears_unreferenced_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CacheState::new(dir.path().to_path_buf(), 1024).await.unwrap();
        let path = PathBuf::from("gone.txt");
        state.install_downloaded_version(&path, 1, 5).await;
        tokio::fs::write(state.version_path(&path, 1), b"x").await.unwrap();

        state.unlink_local(&path).await;

        assert_eq!(state.get_timestamp(&path), crate::wire::NO_EXIST);
        assert!(!state.version_path(&path, 1).exists());
    }
}
