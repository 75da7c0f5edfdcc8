//! TCP transport for the wire protocol: framing, the client side
//! ([`RpcClient`]), and the server's accept loop.

pub mod client;
pub mod framing;
pub mod listener;

pub use client::RpcClient;
