//! The networked half of [`crate::wire::ServerApi`]: encodes a call as a
//! [`Request`], frames it over a shared [`TcpStream`], and decodes the
//! matching [`Response`].

use super::framing;
use crate::error::{CacheError, Result};
use crate::wire::rpc::{decode_response, encode_request, Request, Response};
use crate::wire::{Chunk, OpenMode, ServerApi, UploadStarted, ValidateResult};
use async_trait::async_trait;
use std::io::Cursor;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// A `ServerApi` implementation that talks to a real server process over
/// TCP. Calls are serialized through an internal mutex since the protocol
/// carries no request id to demultiplex interleaved replies.
pub struct RpcClient {
    stream: Mutex<TcpStream>,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<RpcClient> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(RpcClient { stream: Mutex::new(stream) })
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut buf = Vec::new();
        encode_request(&mut buf, &request)?;

        let mut stream = self.stream.lock().await;
        framing::write_frame(&mut *stream, &buf).await?;
        let reply = framing::read_frame(&mut *stream).await?;
        decode_response(&mut Cursor::new(reply))
    }
}

fn unexpected(label: &str) -> CacheError {
    CacheError::Protocol(format!("unexpected response to {label}"))
}

#[async_trait]
impl ServerApi for RpcClient {
    async fn validate(&self, path: &str, mode: OpenMode, client_ts: i64) -> Result<ValidateResult> {
        let request = Request::Validate { path: path.to_string(), mode, client_ts };
        match self.call(request).await? {
            Response::Validate(result) => Ok(result),
            _ => Err(unexpected("Validate")),
        }
    }

    async fn download_chunk(&self, chunk_id: i32) -> Result<Chunk> {
        match self.call(Request::DownloadChunk { chunk_id }).await? {
            Response::DownloadChunk(result) => result.map_err(|code| CacheError::from_code(code).unwrap()),
            _ => Err(unexpected("DownloadChunk")),
        }
    }

    async fn upload(&self, path: &str, first_chunk: Chunk) -> Result<UploadStarted> {
        let request = Request::Upload { path: path.to_string(), first_chunk };
        match self.call(request).await? {
            Response::Upload(result) => result.map_err(|code| CacheError::from_code(code).unwrap()),
            _ => Err(unexpected("Upload")),
        }
    }

    async fn upload_chunk(&self, chunk: Chunk) -> Result<()> {
        match self.call(Request::UploadChunk { chunk }).await? {
            Response::UploadChunk(result) => result.map_err(|code| CacheError::from_code(code).unwrap()),
            _ => Err(unexpected("UploadChunk")),
        }
    }

    async fn cancel_chunk(&self, chunk_id: i32) -> Result<()> {
        match self.call(Request::CancelChunk { chunk_id }).await? {
            Response::CancelChunk(result) => result.map_err(|code| CacheError::from_code(code).unwrap()),
            _ => Err(unexpected("CancelChunk")),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.call(Request::Delete { path: path.to_string() }).await? {
            Response::Delete(result) => result.map_err(|code| CacheError::from_code(code).unwrap()),
            _ => Err(unexpected("Delete")),
        }
    }
}
