//! Error kinds shared by the proxy and the server.
//!
//! Mirrors the POSIX errno values named in the client-facing surface so that
//! a `CacheError` can be turned directly into the negative integer a caller
//! expects back from `open`/`close`/`unlink`.

use std::fmt;

/// Negative-errno style wire codes (see the client <-> proxy surface).
pub const ENOENT: i32 = -2;
pub const EIO: i32 = -5;
pub const EBADF: i32 = -9;
pub const EEXIST: i32 = -17;
pub const EISDIR: i32 = -21;
pub const EINVAL: i32 = -22;
pub const ENOMEM: i32 = -12;
pub const EPERM: i32 = -1;

/// Sentinel `error_code` meaning "call succeeded".
pub const SUCCESS: i32 = 0;

#[derive(Debug)]
pub enum CacheError {
    /// The file or directory named in the call does not exist.
    NoEntry,
    /// `CREATE_NEW` raced an existing file.
    Exists,
    /// The path escapes the service/cache root, or the mode is not
    /// permitted against the file's access bits.
    Permission,
    /// The target is a directory and the mode does not allow that.
    IsDirectory,
    /// Unknown descriptor at the proxy's client-facing layer.
    BadDescriptor,
    /// Malformed arguments or unsupported combination.
    InvalidArgument,
    /// The proxy's cache capacity cannot satisfy a reservation.
    NoSpace,
    /// Local or remote I/O failure, or a transport failure talking to the
    /// server (transport errors are always folded into this variant).
    Io(std::io::Error),
    /// A wire frame could not be decoded into a well-formed request/result.
    Protocol(String),
}

impl CacheError {
    /// Maps this error onto the negative-errno wire code a caller expects.
    pub fn code(&self) -> i32 {
        match self {
            CacheError::NoEntry => ENOENT,
            CacheError::Exists => EEXIST,
            CacheError::Permission => EPERM,
            CacheError::IsDirectory => EISDIR,
            CacheError::BadDescriptor => EBADF,
            CacheError::InvalidArgument => EINVAL,
            CacheError::NoSpace => ENOMEM,
            CacheError::Io(_) => EIO,
            CacheError::Protocol(_) => EIO,
        }
    }

    /// Reconstructs a `CacheError` from a wire `error_code`, for the proxy
    /// side that only has the integer to go on.
    pub fn from_code(code: i32) -> Option<CacheError> {
        match code {
            SUCCESS => None,
            ENOENT => Some(CacheError::NoEntry),
            EEXIST => Some(CacheError::Exists),
            EPERM => Some(CacheError::Permission),
            EISDIR => Some(CacheError::IsDirectory),
            EBADF => Some(CacheError::BadDescriptor),
            EINVAL => Some(CacheError::InvalidArgument),
            ENOMEM => Some(CacheError::NoSpace),
            _ => Some(CacheError::Io(std::io::Error::other(format!(
                "remote error code {code}"
            )))),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NoEntry => write!(f, "no such file or directory"),
            CacheError::Exists => write!(f, "file exists"),
            CacheError::Permission => write!(f, "permission denied"),
            CacheError::IsDirectory => write!(f, "is a directory"),
            CacheError::BadDescriptor => write!(f, "bad descriptor"),
            CacheError::InvalidArgument => write!(f, "invalid argument"),
            CacheError::NoSpace => write!(f, "no space left in cache"),
            CacheError::Io(err) => write!(f, "i/o error: {err}"),
            CacheError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
