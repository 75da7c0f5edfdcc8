//! The proxy <-> server RPC surface: argument/result types, the
//! [`ServerApi`] trait both transports implement, and the request/response
//! envelope used to carry a call over the wire.

use crate::error::Result;
use crate::wire::chunk::Chunk;
use crate::wire::codec::*;
use crate::wire::mode::OpenMode;
use async_trait::async_trait;
use std::io::{Read, Write};

/// Result of a `Validate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateResult {
    pub error_code: i32,
    pub is_directory: bool,
    pub server_ts: i64,
    pub chunk: Option<Chunk>,
}

/// Result of an `Upload`/`UploadChunk` first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStarted {
    pub server_ts: i64,
    pub chunk_id: i32,
}

/// The six wire operations named in the external interface table. Satisfied
/// both by an in-process `Arc<server::Server>` (used by tests) and by
/// `net::client::RpcClient` (the real networked proxy binary).
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn validate(&self, path: &str, mode: OpenMode, client_ts: i64) -> Result<ValidateResult>;
    async fn download_chunk(&self, chunk_id: i32) -> Result<Chunk>;
    async fn upload(&self, path: &str, first_chunk: Chunk) -> Result<UploadStarted>;
    async fn upload_chunk(&self, chunk: Chunk) -> Result<()>;
    async fn cancel_chunk(&self, chunk_id: i32) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// One request frame, tagged by opcode.
#[derive(Debug, Clone)]
pub enum Request {
    Validate { path: String, mode: OpenMode, client_ts: i64 },
    DownloadChunk { chunk_id: i32 },
    Upload { path: String, first_chunk: Chunk },
    UploadChunk { chunk: Chunk },
    CancelChunk { chunk_id: i32 },
    Delete { path: String },
}

/// One response frame. `error_code` carries a [`crate::error::CacheError`]
/// code (0 = success) for every opcode except `Validate`, which has its own
/// `error_code` field inside [`ValidateResult`] per the spec's table.
#[derive(Debug, Clone)]
pub enum Response {
    Validate(ValidateResult),
    DownloadChunk(std::result::Result<Chunk, i32>),
    Upload(std::result::Result<UploadStarted, i32>),
    UploadChunk(std::result::Result<(), i32>),
    CancelChunk(std::result::Result<(), i32>),
    Delete(std::result::Result<(), i32>),
}

const OP_VALIDATE: u8 = 0;
const OP_DOWNLOAD_CHUNK: u8 = 1;
const OP_UPLOAD: u8 = 2;
const OP_UPLOAD_CHUNK: u8 = 3;
const OP_CANCEL_CHUNK: u8 = 4;
const OP_DELETE: u8 = 5;

fn proto_err(msg: &str) -> crate::error::CacheError {
    crate::error::CacheError::Protocol(msg.to_string())
}

pub fn encode_request(dst: &mut impl Write, req: &Request) -> std::io::Result<()> {
    match req {
        Request::Validate { path, mode, client_ts } => {
            write_u8(dst, OP_VALIDATE)?;
            write_string(dst, path)?;
            write_mode(dst, *mode)?;
            write_i64(dst, *client_ts)
        }
        Request::DownloadChunk { chunk_id } => {
            write_u8(dst, OP_DOWNLOAD_CHUNK)?;
            write_i32(dst, *chunk_id)
        }
        Request::Upload { path, first_chunk } => {
            write_u8(dst, OP_UPLOAD)?;
            write_string(dst, path)?;
            write_chunk(dst, first_chunk)
        }
        Request::UploadChunk { chunk } => {
            write_u8(dst, OP_UPLOAD_CHUNK)?;
            write_chunk(dst, chunk)
        }
        Request::CancelChunk { chunk_id } => {
            write_u8(dst, OP_CANCEL_CHUNK)?;
            write_i32(dst, *chunk_id)
        }
        Request::Delete { path } => {
            write_u8(dst, OP_DELETE)?;
            write_string(dst, path)
        }
    }
}

pub fn decode_request(src: &mut impl Read) -> Result<Request> {
    let op = read_u8(src)?;
    Ok(match op {
        OP_VALIDATE => {
            let path = read_string(src)?;
            let mode = read_mode(src)?;
            let client_ts = read_i64(src)?;
            Request::Validate { path, mode, client_ts }
        }
        OP_DOWNLOAD_CHUNK => Request::DownloadChunk { chunk_id: read_i32(src)? },
        OP_UPLOAD => {
            let path = read_string(src)?;
            let first_chunk = read_chunk(src)?;
            Request::Upload { path, first_chunk }
        }
        OP_UPLOAD_CHUNK => Request::UploadChunk { chunk: read_chunk(src)? },
        OP_CANCEL_CHUNK => Request::CancelChunk { chunk_id: read_i32(src)? },
        OP_DELETE => Request::Delete { path: read_string(src)? },
        _ => return Err(proto_err("unknown request opcode")),
    })
}

pub fn encode_response(dst: &mut impl Write, resp: &Response) -> std::io::Result<()> {
    match resp {
        Response::Validate(result) => {
            write_u8(dst, OP_VALIDATE)?;
            write_i32(dst, result.error_code)?;
            write_bool(dst, result.is_directory)?;
            write_i64(dst, result.server_ts)?;
            write_option_chunk(dst, &result.chunk)
        }
        Response::DownloadChunk(result) => {
            write_u8(dst, OP_DOWNLOAD_CHUNK)?;
            match result {
                Ok(chunk) => {
                    write_i32(dst, 0)?;
                    write_chunk(dst, chunk)
                }
                Err(code) => write_i32(dst, *code),
            }
        }
        Response::Upload(result) => {
            write_u8(dst, OP_UPLOAD)?;
            match result {
                Ok(started) => {
                    write_i32(dst, 0)?;
                    write_i64(dst, started.server_ts)?;
                    write_i32(dst, started.chunk_id)
                }
                Err(code) => write_i32(dst, *code),
            }
        }
        Response::UploadChunk(result) => {
            write_u8(dst, OP_UPLOAD_CHUNK)?;
            write_i32(dst, result.err().unwrap_or(0))
        }
        Response::CancelChunk(result) => {
            write_u8(dst, OP_CANCEL_CHUNK)?;
            write_i32(dst, result.err().unwrap_or(0))
        }
        Response::Delete(result) => {
            write_u8(dst, OP_DELETE)?;
            write_i32(dst, result.err().unwrap_or(0))
        }
    }
}

pub fn decode_response(src: &mut impl Read) -> Result<Response> {
    let op = read_u8(src)?;
    Ok(match op {
        OP_VALIDATE => {
            let error_code = read_i32(src)?;
            let is_directory = read_bool(src)?;
            let server_ts = read_i64(src)?;
            let chunk = read_option_chunk(src)?;
            Response::Validate(ValidateResult { error_code, is_directory, server_ts, chunk })
        }
        OP_DOWNLOAD_CHUNK => {
            let code = read_i32(src)?;
            if code == 0 {
                Response::DownloadChunk(Ok(read_chunk(src)?))
            } else {
                Response::DownloadChunk(Err(code))
            }
        }
        OP_UPLOAD => {
            let code = read_i32(src)?;
            if code == 0 {
                let server_ts = read_i64(src)?;
                let chunk_id = read_i32(src)?;
                Response::Upload(Ok(UploadStarted { server_ts, chunk_id }))
            } else {
                Response::Upload(Err(code))
            }
        }
        OP_UPLOAD_CHUNK => {
            let code = read_i32(src)?;
            Response::UploadChunk(if code == 0 { Ok(()) } else { Err(code) })
        }
        OP_CANCEL_CHUNK => {
            let code = read_i32(src)?;
            Response::CancelChunk(if code == 0 { Ok(()) } else { Err(code) })
        }
        OP_DELETE => {
            let code = read_i32(src)?;
            Response::Delete(if code == 0 { Ok(()) } else { Err(code) })
        }
        _ => return Err(proto_err("unknown response opcode")),
    })
}
