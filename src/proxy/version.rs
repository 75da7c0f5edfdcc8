//! Per-path MVCC bookkeeping: [`Version`] metadata, the per-path
//! [`FileRecord`], and the arena key used by the LRU.
//!
//! Per the design notes, the LRU holds [`VersionKey`]s rather than object
//! identities, and a `FileRecord` holds only the version ids it currently
//! considers live; eviction goes key -> record lookup, never the reverse.

use std::collections::HashMap;
use std::path::PathBuf;

pub type VersionId = i32;

/// Sentinel meaning "no visible reader version" (deleted, or never
/// downloaded).
pub const NO_VERSION: VersionId = -1;

/// Metadata tracked per live version. The on-disk bytes are addressed
/// separately via [`crate::proxy::cache_state::CacheState::version_path`].
#[derive(Debug, Clone, Copy)]
pub struct VersionMeta {
    pub ref_count: i32,
}

/// Arena key identifying one version across the whole cache.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct VersionKey {
    pub path: PathBuf,
    pub version_id: VersionId,
}

impl VersionKey {
    pub fn new(path: PathBuf, version_id: VersionId) -> VersionKey {
        VersionKey { path, version_id }
    }
}

/// Per-path MVCC state: the set of live versions, which one readers
/// currently share, and the counter used to mint new writer/download ids.
#[derive(Debug)]
pub struct FileRecord {
    pub version_map: HashMap<VersionId, VersionMeta>,
    pub reader_version_id: VersionId,
    pub latest_version_id: VersionId,
}

impl FileRecord {
    /// A record with no live version yet. `version_id` 0 is conceptually
    /// reserved for "the version that already existed on disk the moment
    /// this record was first constructed" (see the design doc); since this
    /// cache always starts from a freshly swept, empty `cache_root`, no
    /// record is ever constructed with pre-existing content, so id 0 is
    /// never actually minted here -- the first minted id is 1.
    pub fn new() -> FileRecord {
        FileRecord { version_map: HashMap::new(), reader_version_id: NO_VERSION, latest_version_id: 0 }
    }

    /// Mints the next strictly-increasing version id for this record.
    pub fn mint_version_id(&mut self) -> VersionId {
        self.latest_version_id += 1;
        self.latest_version_id
    }
}

impl Default for FileRecord {
    fn default() -> FileRecord {
        FileRecord::new()
    }
}
