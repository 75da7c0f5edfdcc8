//! Chunk payload shared by the download and upload streams.

/// Maximum bytes carried per RPC payload in file transfers.
pub const CHUNK_SIZE: usize = 200 * 1024;

/// Sentinel server timestamp meaning "no such file on the server".
pub const NO_EXIST: i64 = -1;

/// Sentinel `chunk_id` for a single-message transfer; the receiver ignores
/// it on upload and never sees it on a single-chunk download (no follow-up
/// `DownloadChunk` call is made when `end_of_file` is already true).
pub const NO_CHUNK_ID: i32 = -1;

/// One frame of a chunked file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    pub end_of_file: bool,
    pub chunk_id: i32,
}

impl Chunk {
    pub fn final_chunk(bytes: Vec<u8>) -> Chunk {
        Chunk { bytes, end_of_file: true, chunk_id: NO_CHUNK_ID }
    }
}
