//! Daemon transport: length-framed JSON-RPC 2.0 over a Unix socket.
//!
//! - [`frame`]: the mandatory 4-byte big-endian length prefix codec.
//! - [`protocol`]: request/response types, error codes, method schemas.
//! - [`server`]: the daemon itself.
//! - [`client`]: the synchronous client library with direct-mode
//!   fallback.

pub mod client;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::{DaemonClient, DirectClient, SearchClient};
pub use frame::MAX_FRAME_LEN;
pub use protocol::{Request, Response};
pub use server::Daemon;
