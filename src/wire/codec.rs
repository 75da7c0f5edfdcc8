//! Hand-rolled big-endian wire encoding for the proxy <-> server RPC surface.
//!
//! Follows the same shape as a primitive XDR-style parser: small composable
//! `encode_*`/`decode_*` functions over explicit byte order, no reflection,
//! no generic serialization format. Every wire struct gets a pair of
//! functions rather than a derive, so the framing stays exactly as large as
//! the protocol needs.

use crate::error::{CacheError, Result};
use crate::wire::chunk::Chunk;
use crate::wire::mode::OpenMode;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};
use std::io::{self, Read, Write};

fn proto_err(msg: &str) -> CacheError {
    CacheError::Protocol(msg.to_string())
}

pub fn write_u8(dst: &mut impl Write, v: u8) -> io::Result<()> {
    dst.write_u8(v)
}

pub fn read_u8(src: &mut impl Read) -> io::Result<u8> {
    src.read_u8()
}

pub fn write_u32(dst: &mut impl Write, v: u32) -> io::Result<()> {
    dst.write_u32::<BigEndian>(v)
}

pub fn read_u32(src: &mut impl Read) -> io::Result<u32> {
    src.read_u32::<BigEndian>()
}

pub fn write_i32(dst: &mut impl Write, v: i32) -> io::Result<()> {
    dst.write_i32::<BigEndian>(v)
}

pub fn read_i32(src: &mut impl Read) -> io::Result<i32> {
    src.read_i32::<BigEndian>()
}

pub fn write_i64(dst: &mut impl Write, v: i64) -> io::Result<()> {
    dst.write_i64::<BigEndian>(v)
}

pub fn read_i64(src: &mut impl Read) -> io::Result<i64> {
    src.read_i64::<BigEndian>()
}

pub fn write_bool(dst: &mut impl Write, v: bool) -> io::Result<()> {
    write_u8(dst, if v { 1 } else { 0 })
}

pub fn read_bool(src: &mut impl Read) -> io::Result<bool> {
    Ok(read_u8(src)? != 0)
}

/// Length-prefixed (u32) byte vector.
pub fn write_bytes(dst: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    write_u32(dst, bytes.len() as u32)?;
    dst.write_all(bytes)
}

pub fn read_bytes(src: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u32(src)? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

/// Length-prefixed UTF-8 string (used for wire paths).
pub fn write_string(dst: &mut impl Write, s: &str) -> io::Result<()> {
    write_bytes(dst, s.as_bytes())
}

pub fn read_string(src: &mut impl Read) -> Result<String> {
    let bytes = read_bytes(src)?;
    String::from_utf8(bytes).map_err(|_| proto_err("string is not valid utf-8"))
}

pub fn write_mode(dst: &mut impl Write, mode: OpenMode) -> io::Result<()> {
    write_u8(dst, mode.to_u8().expect("OpenMode fits in u8"))
}

pub fn read_mode(src: &mut impl Read) -> Result<OpenMode> {
    let tag = read_u8(src)?;
    OpenMode::from_u8(tag).ok_or_else(|| proto_err("unknown open mode tag"))
}

pub fn write_chunk(dst: &mut impl Write, chunk: &Chunk) -> io::Result<()> {
    write_bytes(dst, &chunk.bytes)?;
    write_bool(dst, chunk.end_of_file)?;
    write_i32(dst, chunk.chunk_id)
}

pub fn read_chunk(src: &mut impl Read) -> Result<Chunk> {
    let bytes = read_bytes(src)?;
    let end_of_file = read_bool(src)?;
    let chunk_id = read_i32(src)?;
    Ok(Chunk { bytes, end_of_file, chunk_id })
}

pub fn write_option_chunk(dst: &mut impl Write, chunk: &Option<Chunk>) -> io::Result<()> {
    write_bool(dst, chunk.is_some())?;
    if let Some(chunk) = chunk {
        write_chunk(dst, chunk)?;
    }
    Ok(())
}

pub fn read_option_chunk(src: &mut impl Read) -> Result<Option<Chunk>> {
    if read_bool(src)? {
        Ok(Some(read_chunk(src)?))
    } else {
        Ok(None)
    }
}
