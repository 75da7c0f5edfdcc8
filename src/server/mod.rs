//! The versioned file store: per-file reader/writer locking, a chunked
//! transfer state machine, and the six wire operations in [`ServerApi`].

mod lock_table;
mod transfer;
pub mod validate;
mod version_index;

use crate::error::{CacheError, Result, SUCCESS};
use crate::wire::{chunk::NO_CHUNK_ID, Chunk, OpenMode, ServerApi, UploadStarted, ValidateResult};
use async_trait::async_trait;
use lock_table::LockTable;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use transfer::{DownloadEntry, TransferEntry, TransferTable, UploadEntry};
use validate::TargetFacts;
use version_index::VersionIndex;

pub use transfer::TransferTable as ServerTransferTable;

/// Owns the canonical file tree and all server-side consistency state.
pub struct Server {
    root: PathBuf,
    versions: VersionIndex,
    locks: LockTable,
    transfers: TransferTable,
}

impl Server {
    /// Opens (scanning) the service root.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Server> {
        let root = root.into();
        let versions = VersionIndex::scan_root(&root)?;
        Ok(Server { root, versions, locks: LockTable::new(), transfers: TransferTable::new() })
    }

    fn abs(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    async fn target_facts(&self, abs: &Path) -> TargetFacts {
        match tokio::fs::metadata(abs).await {
            Ok(meta) => TargetFacts {
                exists: true,
                is_directory: meta.is_dir(),
                is_regular_file: meta.is_file(),
                // The server process is assumed to run with read access to
                // everything under its root; write access follows the
                // platform-portable readonly bit (no libc dependency for a
                // full Unix mode check).
                can_read: true,
                can_write: !meta.permissions().readonly(),
            },
            Err(_) => TargetFacts {
                exists: false,
                is_directory: false,
                is_regular_file: false,
                can_read: false,
                can_write: false,
            },
        }
    }

    fn normalize(path: &str) -> Result<PathBuf> {
        crate::wire::path::normalize(path)
    }
}

#[async_trait]
impl ServerApi for Server {
    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn validate(&self, path: &str, mode: OpenMode, client_ts: i64) -> Result<ValidateResult> {
        let rel = match Self::normalize(path) {
            Ok(rel) => rel,
            Err(_) => {
                return Ok(ValidateResult {
                    error_code: CacheError::Permission.code(),
                    is_directory: false,
                    server_ts: crate::wire::NO_EXIST,
                    chunk: None,
                })
            }
        };

        let guard = self.locks.acquire_read(&rel).await;
        let abs = self.abs(&rel);
        let facts = self.target_facts(&abs).await;
        let error_code = validate::classify(facts, mode);

        if error_code != SUCCESS {
            drop(guard);
            tracing::debug!(error_code, "validate rejected");
            return Ok(ValidateResult {
                error_code,
                is_directory: facts.is_directory,
                server_ts: self.versions.get(&rel).unwrap_or(crate::wire::NO_EXIST),
                chunk: None,
            });
        }

        if !facts.exists {
            drop(guard);
            return Ok(ValidateResult {
                error_code: SUCCESS,
                is_directory: false,
                server_ts: crate::wire::NO_EXIST,
                chunk: None,
            });
        }

        if facts.is_directory {
            drop(guard);
            return Ok(ValidateResult {
                error_code: SUCCESS,
                is_directory: true,
                server_ts: crate::wire::NO_EXIST,
                chunk: None,
            });
        }

        let server_ts = self.versions.get(&rel).unwrap_or(0);
        if client_ts == server_ts {
            drop(guard);
            return Ok(ValidateResult { error_code: SUCCESS, is_directory: false, server_ts, chunk: None });
        }

        let mut file = tokio::fs::File::open(&abs).await?;
        let size = file.metadata().await?.len();
        let first_len = std::cmp::min(size, crate::wire::CHUNK_SIZE as u64) as usize;
        let mut bytes = vec![0u8; first_len];
        file.read_exact(&mut bytes).await?;
        let remaining = size - first_len as u64;

        if remaining == 0 {
            drop(guard);
            tracing::debug!("validate served single-chunk download");
            return Ok(ValidateResult {
                error_code: SUCCESS,
                is_directory: false,
                server_ts,
                chunk: Some(Chunk::final_chunk(bytes)),
            });
        }

        let chunk_id = self.transfers.next_chunk_id();
        self.transfers
            .insert(
                chunk_id,
                TransferEntry::Download(DownloadEntry { file, path: rel.clone(), remaining, _guard: guard }),
            )
            .await;
        tracing::debug!(chunk_id, remaining, "validate started multi-chunk download");
        Ok(ValidateResult {
            error_code: SUCCESS,
            is_directory: false,
            server_ts,
            chunk: Some(Chunk { bytes, end_of_file: false, chunk_id }),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn download_chunk(&self, chunk_id: i32) -> Result<Chunk> {
        let (bytes, done) = read_next_download_chunk(&self.transfers, chunk_id).await?;
        if done {
            tracing::debug!(chunk_id, "download complete, reader lock released");
        }
        Ok(Chunk { bytes, end_of_file: done, chunk_id })
    }

    #[tracing::instrument(skip(self, first_chunk), fields(path = %path))]
    async fn upload(&self, path: &str, first_chunk: Chunk) -> Result<UploadStarted> {
        let rel = Self::normalize(path)?;
        let guard = self.locks.acquire_write(&rel).await;
        let abs = self.abs(&rel);

        if let Ok(meta) = tokio::fs::metadata(&abs).await {
            if meta.is_dir() {
                return Err(CacheError::IsDirectory);
            }
        }
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&abs).await?;
        file.write_all(&first_chunk.bytes).await?;

        // The timestamp is bumped as soon as Upload is called, not when the
        // stream finally completes: the writer lock stays held for the
        // whole transfer, so no reader can observe the bumped timestamp
        // before the bytes backing it are fully written.
        let server_ts = self.versions.bump(&rel);

        if first_chunk.end_of_file {
            drop(file);
            drop(guard);
            tracing::debug!(server_ts, "upload committed in one chunk");
            return Ok(UploadStarted { server_ts, chunk_id: NO_CHUNK_ID });
        }

        let chunk_id = self.transfers.next_chunk_id();
        self.transfers
            .insert(chunk_id, TransferEntry::Upload(UploadEntry { file, path: rel.clone(), _guard: guard }))
            .await;
        tracing::debug!(chunk_id, server_ts, "upload started multi-chunk stream");
        Ok(UploadStarted { server_ts, chunk_id })
    }

    #[tracing::instrument(skip(self, chunk))]
    async fn upload_chunk(&self, chunk: Chunk) -> Result<()> {
        let chunk_id = chunk.chunk_id;
        write_upload_chunk(&self.transfers, chunk_id, &chunk.bytes).await?;

        if chunk.end_of_file {
            if let Some(TransferEntry::Upload(_)) = self.transfers.take(chunk_id).await {
                tracing::debug!(chunk_id, "upload complete, writer lock released");
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_chunk(&self, chunk_id: i32) -> Result<()> {
        if let Some(entry) = self.transfers.take(chunk_id).await {
            if matches!(entry, TransferEntry::Download(_)) {
                tracing::debug!(chunk_id, "download cancelled, reader lock released");
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<()> {
        let rel = Self::normalize(path)?;
        let guard = self.locks.acquire_write(&rel).await;
        let abs = self.abs(&rel);

        let meta = tokio::fs::metadata(&abs).await.map_err(|_| CacheError::NoEntry)?;
        if meta.is_dir() {
            return Err(CacheError::IsDirectory);
        }
        tokio::fs::remove_file(&abs).await?;
        self.versions.remove(&rel);
        drop(guard);
        self.locks.forget(&rel);
        tracing::debug!("deleted");
        Ok(())
    }
}

async fn read_next_download_chunk(table: &TransferTable, chunk_id: i32) -> Result<(Vec<u8>, bool)> {
    // Briefly take the entry out of the table, operate on it, and put it
    // back unless this was the final chunk (in which case it stays removed
    // and its guard drops, releasing the reader lock).
    let mut entry = table.take(chunk_id).await.ok_or(CacheError::InvalidArgument)?;
    let (bytes, done) = match &mut entry {
        TransferEntry::Download(download) => {
            let take = std::cmp::min(download.remaining, crate::wire::CHUNK_SIZE as u64) as usize;
            let mut bytes = vec![0u8; take];
            download.file.read_exact(&mut bytes).await?;
            download.remaining -= take as u64;
            (bytes, download.remaining == 0)
        }
        TransferEntry::Upload(_) => return Err(CacheError::InvalidArgument),
    };
    if !done {
        table.insert(chunk_id, entry).await;
    }
    Ok((bytes, done))
}

async fn write_upload_chunk(table: &TransferTable, chunk_id: i32, bytes: &[u8]) -> Result<()> {
    let mut entry = table.take(chunk_id).await.ok_or(CacheError::InvalidArgument)?;
    let result = match &mut entry {
        TransferEntry::Upload(upload) => upload.file.write_all(bytes).await.map_err(CacheError::from),
        TransferEntry::Download(_) => Err(CacheError::InvalidArgument),
    };
    table.insert(chunk_id, entry).await;
    result
}
