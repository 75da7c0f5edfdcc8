//! The cache engine: `open`/`close`/`unlink`, generic over the transport
//! used to reach the server (a direct `Arc<Server>` in tests, `RpcClient`
//! in the real proxy binary).
//!
//! A single `tokio::sync::Mutex<CacheState>` serializes `open` top to
//! bottom and all of `close`'s bookkeeping, held across the `Validate` RPC
//! and the download save loop, matching the AFS open/close session model
//! this cache implements.

use super::cache_state::{CacheState, WriterOutcome};
use super::handle::OpenHandle;
use super::version::VersionId;
use crate::error::{CacheError, Result};
use crate::wire::{Chunk, OpenMode, ServerApi, CHUNK_SIZE, NO_CHUNK_ID};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

pub struct CacheEngine<S: ServerApi> {
    state: Mutex<CacheState>,
    server: S,
}

impl<S: ServerApi> CacheEngine<S> {
    pub async fn new(server: S, cache_root: PathBuf, capacity: u64) -> std::io::Result<CacheEngine<S>> {
        let state = CacheState::new(cache_root, capacity).await?;
        Ok(CacheEngine { state: Mutex::new(state), server })
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn open(&self, path: &str, mode: OpenMode) -> Result<OpenHandle> {
        let mut state = self.state.lock().await;
        let rel = crate::wire::path::normalize(path)?;
        let local_ts = state.get_timestamp(&rel);

        let validated = self.server.validate(path, mode, local_ts).await?;

        if validated.error_code != crate::error::SUCCESS {
            let err = CacheError::from_code(validated.error_code).unwrap_or(CacheError::Io(std::io::Error::other("unknown error code")));
            if matches!(err, CacheError::NoEntry) {
                state.clear_reader_version(&rel);
            }
            return Err(err);
        }

        if validated.is_directory {
            return Ok(OpenHandle::Directory);
        }

        if let Some(first_chunk) = validated.chunk {
            let server_ts = validated.server_ts;
            if state.get_timestamp(&rel) == server_ts {
                // A concurrent open already installed this exact timestamp
                // (only possible if the engine mutex's scope is ever
                // narrowed below the whole open call); this one is stale.
                self.server.cancel_chunk(first_chunk.chunk_id).await.ok();
            } else {
                self.download_and_install(&mut state, &rel, server_ts, first_chunk).await?;
            }
        }

        let (file, version_id) =
            if mode.needs_write() { state.acquire_writer(&rel).await? } else { state.acquire_reader(&rel).await? };

        Ok(OpenHandle::File { file, path: rel, version_id, mode })
    }

    async fn download_and_install(
        &self,
        state: &mut CacheState,
        path: &Path,
        server_ts: i64,
        first_chunk: Chunk,
    ) -> Result<()> {
        let version_id = state.mint_download_version(path);
        let file_path = state.version_path(path, version_id);
        let mut written: u64 = 0;
        let mut file: Option<tokio::fs::File> = None;
        let mut chunk = first_chunk;

        // Every fallible step below (not just the NoSpace check) must leave
        // `state` and the partial file consistent, so every error path
        // breaks out to the same cleanup instead of propagating via `?`.
        let outcome: Result<()> = loop {
            let len = chunk.bytes.len() as u64;
            if !state.reserve_download_bytes(len).await {
                break Err(CacheError::NoSpace);
            }
            written += len;

            if file.is_none() {
                match tokio::fs::OpenOptions::new().create(true).write(true).truncate(true).open(&file_path).await {
                    Ok(opened) => file = Some(opened),
                    Err(err) => break Err(CacheError::from(err)),
                }
            }
            if let Err(err) = file.as_mut().unwrap().write_all(&chunk.bytes).await {
                break Err(CacheError::from(err));
            }

            if chunk.end_of_file {
                break Ok(());
            }
            chunk = match self.server.download_chunk(chunk.chunk_id).await {
                Ok(next) => next,
                Err(err) => break Err(err),
            };
        };

        match outcome {
            Ok(()) => {
                drop(file);
                state.install_downloaded_version(path, version_id, server_ts).await;
                Ok(())
            }
            Err(err) => {
                drop(file.take());
                let _ = tokio::fs::remove_file(&file_path).await;
                state.abandon_download(written);
                if !chunk.end_of_file {
                    self.server.cancel_chunk(chunk.chunk_id).await.ok();
                }
                Err(err)
            }
        }
    }

    #[tracing::instrument(skip(self, handle))]
    pub async fn close(&self, handle: OpenHandle) -> Result<()> {
        match handle {
            OpenHandle::Directory => Ok(()),
            OpenHandle::File { file, path, version_id, mode } => {
                drop(file);
                let mut state = self.state.lock().await;
                if mode.needs_write() {
                    self.release_writer(&mut state, &path, version_id).await
                } else {
                    state.release_reader(&path, version_id).await;
                    Ok(())
                }
            }
        }
    }

    async fn release_writer(&self, state: &mut CacheState, path: &Path, version_id: VersionId) -> Result<()> {
        let file_path = state.version_path(path, version_id);
        match self.run_upload(path, &file_path).await {
            Ok(server_ts) => {
                state.finish_writer(path, version_id, WriterOutcome::Committed { server_ts }).await;
                Ok(())
            }
            Err(err) => {
                state.finish_writer(path, version_id, WriterOutcome::Divergent).await;
                Err(err)
            }
        }
    }

    async fn run_upload(&self, path: &Path, file_path: &Path) -> Result<i64> {
        let wire_path = path_to_wire_string(path);
        let mut file = tokio::fs::File::open(file_path).await?;
        let size = file.metadata().await?.len();

        let first_len = std::cmp::min(size, CHUNK_SIZE as u64) as usize;
        let mut bytes = vec![0u8; first_len];
        file.read_exact(&mut bytes).await?;
        let mut remaining = size - first_len as u64;
        let started = self
            .server
            .upload(&wire_path, Chunk { bytes, end_of_file: remaining == 0, chunk_id: NO_CHUNK_ID })
            .await?;

        let mut chunk_id = started.chunk_id;
        while remaining > 0 {
            let take = std::cmp::min(remaining, CHUNK_SIZE as u64) as usize;
            let mut bytes = vec![0u8; take];
            file.read_exact(&mut bytes).await?;
            remaining -= take as u64;
            self.server.upload_chunk(Chunk { bytes, end_of_file: remaining == 0, chunk_id }).await?;
        }

        Ok(started.server_ts)
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.server.delete(path).await?;
        let rel = crate::wire::path::normalize(path)?;
        let mut state = self.state.lock().await;
        state.unlink_local(&rel).await;
        Ok(())
    }
}

fn path_to_wire_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
