//! Accepts connections and runs one request/response loop per socket.
//!
//! Unlike the teacher's NFS listener, which splits each connection into a
//! reader task, a processing task, and a writer task joined by channels (to
//! support NFS's early-reply procedures), this protocol has no early
//! replies and no pipelining: each call is answered before the next frame
//! is read, so a single task per connection is all the decoupling this
//! protocol needs.

use super::framing;
use crate::error::Result;
use crate::wire::rpc::{decode_request, encode_response, Request, Response};
use crate::wire::{ServerApi, ValidateResult, NO_EXIST};
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Runs the accept loop forever, spawning one task per accepted connection.
pub async fn serve<S: ServerApi + 'static>(listener: TcpListener, server: Arc<S>) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, server).await {
                tracing::warn!(%peer, error = %err, "connection closed");
            }
        });
    }
}

async fn handle_connection<S: ServerApi>(mut socket: tokio::net::TcpStream, server: Arc<S>) -> Result<()> {
    loop {
        let frame = match framing::read_frame(&mut socket).await {
            Ok(frame) => frame,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let request = decode_request(&mut Cursor::new(frame))?;
        let response = dispatch(server.as_ref(), request).await;

        let mut buf = Vec::new();
        encode_response(&mut buf, &response)?;
        framing::write_frame(&mut socket, &buf).await?;
    }
}

async fn dispatch<S: ServerApi>(server: &S, request: Request) -> Response {
    match request {
        Request::Validate { path, mode, client_ts } => match server.validate(&path, mode, client_ts).await {
            Ok(result) => Response::Validate(result),
            Err(err) => {
                Response::Validate(ValidateResult { error_code: err.code(), is_directory: false, server_ts: NO_EXIST, chunk: None })
            }
        },
        Request::DownloadChunk { chunk_id } => {
            Response::DownloadChunk(server.download_chunk(chunk_id).await.map_err(|err| err.code()))
        }
        Request::Upload { path, first_chunk } => {
            Response::Upload(server.upload(&path, first_chunk).await.map_err(|err| err.code()))
        }
        Request::UploadChunk { chunk } => Response::UploadChunk(server.upload_chunk(chunk).await.map_err(|err| err.code())),
        Request::CancelChunk { chunk_id } => Response::CancelChunk(server.cancel_chunk(chunk_id).await.map_err(|err| err.code())),
        Request::Delete { path } => Response::Delete(server.delete(&path).await.map_err(|err| err.code())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use crate::wire::OpenMode;

    #[tokio::test]
    async fn dispatch_validate_maps_error_into_validate_result() {
        let root = tempfile::tempdir().unwrap();
        let server = Server::open(root.path()).unwrap();

        let response = dispatch(&server, Request::Validate { path: "missing.txt".into(), mode: OpenMode::Read, client_ts: -1 }).await;
        match response {
            Response::Validate(result) => assert_eq!(result.error_code, crate::error::ENOENT),
            other => panic!("unexpected {other:?}"),
        }
    }
}
