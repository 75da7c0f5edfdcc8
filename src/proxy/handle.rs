//! What an `open()` call hands back: either a cached file backed by a pinned
//! [`Version`](super::version::Version), or a directory placeholder.

use super::version::VersionId;
use crate::wire::OpenMode;
use std::path::PathBuf;

pub enum OpenHandle {
    File { file: tokio::fs::File, path: PathBuf, version_id: VersionId, mode: OpenMode },
    Directory,
}

impl OpenHandle {
    pub fn is_directory(&self) -> bool {
        matches!(self, OpenHandle::Directory)
    }
}
