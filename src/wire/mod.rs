//! Wire types and codec for the proxy <-> server protocol.
//!
//! The RPC transport itself is out of scope per the design doc; this module
//! only pins down the *shape* of the data that crosses it (paths, modes,
//! chunks) and a concrete byte encoding for them.

pub mod chunk;
pub mod codec;
pub mod mode;
pub mod path;
pub mod rpc;

pub use chunk::{Chunk, CHUNK_SIZE, NO_CHUNK_ID, NO_EXIST};
pub use mode::OpenMode;
pub use rpc::{Request, Response, ServerApi, UploadStarted, ValidateResult};
