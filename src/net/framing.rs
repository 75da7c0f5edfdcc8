//! Length-prefixed TCP framing around the request/response codec in
//! [`crate::wire::rpc`]. Each frame is a `u32` big-endian byte count
//! followed by that many bytes of an encoded `Request` or `Response`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are rejected rather than allocated, guarding
/// against a corrupt or hostile length prefix.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::other(format!("frame length {len} exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame(stream: &mut (impl AsyncWrite + Unpin), bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, b"hello").await.unwrap();
        let mut cursor = Cursor::new(out);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
