//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! Authenticated request head
//!     → pool.rs (borrow a connection for the source)
//!     → handshake.rs (negotiate by traffic class)
//!     → ready stream returned to the engine
//! ```

pub mod handshake;
pub mod pool;

pub use handshake::{ForwardingHandshaker, HandshakeError, Handshaker, TunnelingHandshaker};
pub use pool::{AsyncStream, TcpUpstreamPool, UpstreamConn, UpstreamPool};
