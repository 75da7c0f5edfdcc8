//! A distributed AFS-style file caching proxy and server.
//!
//! [`server`] owns the canonical file tree and per-file consistency state.
//! [`proxy`] is the client-facing cache: MVCC versions, LRU eviction, and
//! the open/close/unlink control flow. [`wire`] is the shared protocol
//! vocabulary and codec; [`net`] carries it over TCP.

pub mod config;
pub mod error;
pub mod net;
pub mod proxy;
pub mod server;
pub mod wire;

pub use error::{CacheError, Result};
