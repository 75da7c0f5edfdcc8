//! End-to-end scenarios driving `CacheEngine` against an in-process
//! `Arc<Server>` (no sockets) and, for the transport-level scenario, a real
//! `RpcClient` talking to a `net::listener` over TCP.

use afs_cache::error::CacheError;
use afs_cache::net::{listener, RpcClient};
use afs_cache::proxy::{CacheEngine, OpenHandle};
use afs_cache::server::Server;
use afs_cache::wire::{Chunk, OpenMode, ServerApi, UploadStarted, ValidateResult, CHUNK_SIZE};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

async fn engine(server_root: &std::path::Path, cache_root: &std::path::Path, capacity: u64) -> CacheEngine<Arc<Server>> {
    let server = Arc::new(Server::open(server_root).unwrap());
    CacheEngine::new(server, cache_root.to_path_buf(), capacity).await.unwrap()
}

async fn read_all(handle: &mut OpenHandle) -> Vec<u8> {
    let OpenHandle::File { file, .. } = handle else { panic!("expected file handle") };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn cold_read_serves_server_bytes_through_a_high_fd() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("A.txt"), b"hello").await.unwrap();
    let eng = engine(server_root.path(), cache_root.path(), 1024 * 1024).await;

    let mut handle = eng.open("A.txt", OpenMode::Read).await.unwrap();
    assert_eq!(read_all(&mut handle).await, b"hello");
    eng.close(handle).await.unwrap();

    assert!(cache_root.path().join("A.txt1").exists());
}

#[tokio::test]
async fn warm_read_does_not_contact_the_server_again() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("A.txt"), b"hello").await.unwrap();
    let server = Arc::new(Server::open(server_root.path()).unwrap());
    let eng = CacheEngine::new(server.clone(), cache_root.path().to_path_buf(), 1024 * 1024).await.unwrap();

    let h1 = eng.open("A.txt", OpenMode::Read).await.unwrap();
    eng.close(h1).await.unwrap();

    // The proxy's own timestamp now matches the server's, so a second
    // Validate returns success with no chunk: mutate the server file
    // in place (no timestamp bump) and confirm the proxy still hands
    // back the cached bytes rather than the new ones.
    tokio::fs::write(server_root.path().join("A.txt"), b"mutated").await.unwrap();

    let mut h2 = eng.open("A.txt", OpenMode::Read).await.unwrap();
    assert_eq!(read_all(&mut h2).await, b"hello");
    eng.close(h2).await.unwrap();
}

#[tokio::test]
async fn reader_keeps_its_open_time_snapshot_across_concurrent_writers() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("base.txt"), b"X").await.unwrap();
    let eng = engine(server_root.path(), cache_root.path(), 1024 * 1024).await;

    let reader = eng.open("base.txt", OpenMode::Read).await.unwrap();

    // W1 and W2 both open (and thus both copy) before either closes, so
    // W2's copy is taken from "X", not from W1's eventual "X1".
    let mut w1 = eng.open("base.txt", OpenMode::Write).await.unwrap();
    let mut w2 = eng.open("base.txt", OpenMode::Write).await.unwrap();

    if let OpenHandle::File { file, .. } = &mut w1 {
        file.seek(SeekFrom::End(0)).await.unwrap();
        file.write_all(b"1").await.unwrap();
    } else {
        panic!("expected file");
    }
    eng.close(w1).await.unwrap();

    if let OpenHandle::File { file, .. } = &mut w2 {
        file.seek(SeekFrom::End(0)).await.unwrap();
        file.write_all(b"2").await.unwrap();
    } else {
        panic!("expected file");
    }
    eng.close(w2).await.unwrap();

    // The reader opened before either writer committed still sees "X".
    let mut still_open = reader;
    assert_eq!(read_all(&mut still_open).await, b"X");
    eng.close(still_open).await.unwrap();

    // A fresh reader opened after both commits sees the last close's bytes.
    let mut fresh = eng.open("base.txt", OpenMode::Read).await.unwrap();
    assert_eq!(read_all(&mut fresh).await, b"X2");
    eng.close(fresh).await.unwrap();

    assert_eq!(tokio::fs::read(server_root.path().join("base.txt")).await.unwrap(), b"X2");
}

#[tokio::test]
async fn create_new_collides_with_an_existing_file_and_read_of_a_missing_one_fails() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("A.txt"), b"x").await.unwrap();
    let eng = engine(server_root.path(), cache_root.path(), 1024 * 1024).await;

    let err = eng.open("A.txt", OpenMode::CreateNew).await.unwrap_err();
    assert!(matches!(err, CacheError::Exists));

    let err = eng.open("no.txt", OpenMode::Read).await.unwrap_err();
    assert!(matches!(err, CacheError::NoEntry));
}

#[tokio::test]
async fn directories_open_for_read_but_reject_write() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::create_dir(server_root.path().join("sub")).await.unwrap();
    let eng = engine(server_root.path(), cache_root.path(), 1024 * 1024).await;

    let handle = eng.open("sub", OpenMode::Read).await.unwrap();
    assert!(handle.is_directory());
    eng.close(handle).await.unwrap();

    let err = eng.open("sub", OpenMode::Write).await.unwrap_err();
    assert!(matches!(err, CacheError::IsDirectory));
}

#[tokio::test]
async fn lru_eviction_skips_a_pinned_handle_in_least_recent_order() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    // Each file is 10 bytes; a 5.5x capacity holds five of them comfortably
    // but not a sixth without evicting.
    let names = ["A.txt", "B.txt", "C.txt", "D.txt", "E.txt", "F.txt", "G.txt"];
    for name in &names {
        tokio::fs::write(server_root.path().join(name), b"0123456789").await.unwrap();
    }
    let eng = engine(server_root.path(), cache_root.path(), 55).await;

    for name in &names[..5] {
        let handle = eng.open(name, OpenMode::Read).await.unwrap();
        eng.close(handle).await.unwrap();
    }
    for name in &names[..5] {
        assert!(cache_root.path().join(format!("{name}1")).exists());
    }

    // F is opened and held (pinned): admitting it evicts A, the least
    // recently touched unpinned entry.
    let f_handle = eng.open("F.txt", OpenMode::Read).await.unwrap();
    assert!(!cache_root.path().join("A.txt1").exists());
    assert!(cache_root.path().join("F.txt1").exists());

    // G is opened and closed: admitting it evicts B next, since F is
    // pinned and every other entry is older than F in LRU order.
    let g_handle = eng.open("G.txt", OpenMode::Read).await.unwrap();
    eng.close(g_handle).await.unwrap();
    assert!(!cache_root.path().join("B.txt1").exists());
    assert!(cache_root.path().join("C.txt1").exists());
    assert!(cache_root.path().join("D.txt1").exists());
    assert!(cache_root.path().join("E.txt1").exists());
    assert!(cache_root.path().join("F.txt1").exists());
    assert!(cache_root.path().join("G.txt1").exists());

    eng.close(f_handle).await.unwrap();
}

#[tokio::test]
async fn out_of_space_download_cancels_the_chunk_and_frees_the_server_lock() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    // CHUNK_SIZE is 200 KiB; a 500 KiB file needs three chunks. A 100 KiB
    // cache can't hold even the first chunk, and there is nothing else
    // cached yet to evict in its place.
    let big = vec![7u8; 500 * 1024];
    tokio::fs::write(server_root.path().join("big.bin"), &big).await.unwrap();
    let server = Arc::new(Server::open(server_root.path()).unwrap());
    let eng = CacheEngine::new(server.clone(), cache_root.path().to_path_buf(), 100 * 1024).await.unwrap();

    let err = eng.open("big.bin", OpenMode::Read).await.unwrap_err();
    assert!(matches!(err, CacheError::NoSpace));

    // The reader lock the aborted Validate/DownloadChunk sequence held is
    // observably free on this same server: a fresh Upload to the same path
    // does not block.
    let upload = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        server.upload("big.bin", Chunk::final_chunk(b"new".to_vec())),
    )
    .await;
    assert!(upload.is_ok(), "upload should not block on a stale lock");
    upload.unwrap().unwrap();
}

#[tokio::test]
async fn unlink_removes_the_file_from_server_and_cache() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("A.txt"), b"x").await.unwrap();
    let eng = engine(server_root.path(), cache_root.path(), 1024 * 1024).await;

    let handle = eng.open("A.txt", OpenMode::Read).await.unwrap();
    eng.close(handle).await.unwrap();
    eng.unlink("A.txt").await.unwrap();

    assert!(!server_root.path().join("A.txt").exists());
    let err = eng.open("A.txt", OpenMode::Read).await.unwrap_err();
    assert!(matches!(err, CacheError::NoEntry));
}

/// Wraps an `Arc<Server>`, counting `DownloadChunk` calls, to verify the
/// exact-`CHUNK_SIZE` boundary case never issues one.
struct CountingServer {
    inner: Arc<Server>,
    download_chunk_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ServerApi for CountingServer {
    async fn validate(&self, path: &str, mode: OpenMode, client_ts: i64) -> afs_cache::Result<ValidateResult> {
        self.inner.validate(path, mode, client_ts).await
    }

    async fn download_chunk(&self, chunk_id: i32) -> afs_cache::Result<Chunk> {
        self.download_chunk_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.download_chunk(chunk_id).await
    }

    async fn upload(&self, path: &str, first_chunk: Chunk) -> afs_cache::Result<UploadStarted> {
        self.inner.upload(path, first_chunk).await
    }

    async fn upload_chunk(&self, chunk: Chunk) -> afs_cache::Result<()> {
        self.inner.upload_chunk(chunk).await
    }

    async fn cancel_chunk(&self, chunk_id: i32) -> afs_cache::Result<()> {
        self.inner.cancel_chunk(chunk_id).await
    }

    async fn delete(&self, path: &str) -> afs_cache::Result<()> {
        self.inner.delete(path).await
    }
}

#[tokio::test]
async fn file_exactly_one_chunk_downloads_without_a_follow_up_chunk_call() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    let exact = vec![9u8; CHUNK_SIZE];
    tokio::fs::write(server_root.path().join("exact.bin"), &exact).await.unwrap();

    let download_chunk_calls = Arc::new(AtomicUsize::new(0));
    let server = CountingServer {
        inner: Arc::new(Server::open(server_root.path()).unwrap()),
        download_chunk_calls: download_chunk_calls.clone(),
    };
    let eng = CacheEngine::new(server, cache_root.path().to_path_buf(), 1024 * 1024).await.unwrap();

    let mut handle = eng.open("exact.bin", OpenMode::Read).await.unwrap();
    assert_eq!(read_all(&mut handle).await, exact);
    eng.close(handle).await.unwrap();

    assert_eq!(download_chunk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cache_engine_drives_a_real_tcp_connection_to_the_server() {
    let server_root = TempDir::new().unwrap();
    let cache_root = TempDir::new().unwrap();
    tokio::fs::write(server_root.path().join("A.txt"), b"hello over tcp").await.unwrap();

    let server = Arc::new(Server::open(server_root.path()).unwrap());
    let tcp_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp_listener.local_addr().unwrap();
    let serve_task = tokio::spawn(listener::serve(tcp_listener, server));

    let client = RpcClient::connect(addr).await.unwrap();
    let eng = CacheEngine::new(client, cache_root.path().to_path_buf(), 1024 * 1024).await.unwrap();

    let mut handle = eng.open("A.txt", OpenMode::Read).await.unwrap();
    assert_eq!(read_all(&mut handle).await, b"hello over tcp");
    eng.close(handle).await.unwrap();

    eng.unlink("A.txt").await.unwrap();
    let err = eng.open("A.txt", OpenMode::Read).await.unwrap_err();
    assert!(matches!(err, CacheError::NoEntry));

    serve_task.abort();
}
