//! Upstream connection acquisition.
//!
//! # Responsibilities
//! - Borrow a ready upstream connection for a routing source
//! - Rotate through the source's endpoints round-robin
//! - Bound each connect attempt with a timeout

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::routing::Source;

/// Byte stream suitable for carrying an upstream connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A borrowed upstream connection, ready for negotiation.
pub struct UpstreamConn {
    /// The connected byte stream.
    pub stream: Box<dyn AsyncStream>,

    /// Endpoint address the stream is connected to, for logging.
    pub endpoint: String,

    /// Pre-encoded `Basic ...` value for the upstream's own auth, if any.
    pub proxy_auth: Option<String>,
}

impl std::fmt::Debug for UpstreamConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConn")
            .field("endpoint", &self.endpoint)
            .field("proxy_auth", &self.proxy_auth.is_some())
            .finish()
    }
}

/// Provider of upstream connections.
///
/// `borrow` resolves to `None` when no upstream can be produced; the caller
/// answers the client with a synthesized failure and closes.
pub trait UpstreamPool: Send + Sync {
    fn borrow<'a>(&'a self, source: &'a Source) -> BoxFuture<'a, Option<UpstreamConn>>;
}

/// Pool that dials the source's endpoints directly over TCP.
///
/// Endpoints are tried in round-robin order starting from an internal cursor;
/// the first successful connect wins.
#[derive(Debug)]
pub struct TcpUpstreamPool {
    cursor: AtomicUsize,
    connect_timeout: Duration,
}

impl TcpUpstreamPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            connect_timeout,
        }
    }
}

impl UpstreamPool for TcpUpstreamPool {
    fn borrow<'a>(&'a self, source: &'a Source) -> BoxFuture<'a, Option<UpstreamConn>> {
        Box::pin(async move {
            if source.upstreams.is_empty() {
                tracing::warn!(source = %source.name, "No upstreams configured");
                return None;
            }

            let start = self.cursor.fetch_add(1, Ordering::Relaxed);
            let len = source.upstreams.len();

            for i in 0..len {
                let endpoint = &source.upstreams[(start + i) % len];

                match tokio::time::timeout(
                    self.connect_timeout,
                    TcpStream::connect(&endpoint.address),
                )
                .await
                {
                    Ok(Ok(stream)) => {
                        if let Err(error) = stream.set_nodelay(true) {
                            tracing::debug!(endpoint = %endpoint.address, %error, "Failed to set TCP_NODELAY");
                        }
                        tracing::debug!(
                            source = %source.name,
                            endpoint = %endpoint.address,
                            "Upstream connected"
                        );
                        return Some(UpstreamConn {
                            stream: Box::new(stream),
                            endpoint: endpoint.address.clone(),
                            proxy_auth: endpoint.proxy_auth.clone(),
                        });
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(
                            source = %source.name,
                            endpoint = %endpoint.address,
                            %error,
                            "Upstream connect failed"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            source = %source.name,
                            endpoint = %endpoint.address,
                            timeout_secs = self.connect_timeout.as_secs(),
                            "Upstream connect timed out"
                        );
                    }
                }
            }

            None
        })
    }
}
