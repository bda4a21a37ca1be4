//! Upstream negotiation strategies.
//!
//! # Data Flow
//! ```text
//! Borrowed UpstreamConn + client request head
//!     → ForwardingHandshaker (plain HTTP: upstream speaks proxy-HTTP already)
//!     → TunnelingHandshaker (CONNECT: open a tunnel through the upstream first)
//!     → ready stream handed back to the engine for drain + relay
//! ```
//!
//! # Design Decisions
//! - Negotiation is a trait seam so tests can inject failing or scripted
//!   handshakes without a real upstream
//! - The tunneling variant authenticates to the upstream with the endpoint's
//!   pre-encoded credentials, never the client's

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::engine::request::RequestHead;
use crate::upstream::pool::UpstreamConn;

/// Upper bound on the upstream's CONNECT response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Error type for upstream negotiation.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("IO error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream closed during handshake")]
    Closed,

    #[error("upstream rejected tunnel with status {0}")]
    Rejected(u16),

    #[error("malformed handshake response")]
    Malformed,

    #[error("handshake response exceeds {MAX_RESPONSE_HEAD} bytes")]
    ResponseTooLarge,
}

/// Prepares a borrowed upstream connection to carry the client's traffic.
///
/// On success, returns any bytes the upstream sent past the end of its own
/// negotiation response; those belong to the relayed stream and must reach
/// the client before the relay starts.
pub trait Handshaker: Send + Sync {
    fn handshake<'a>(
        &'a self,
        upstream: &'a mut UpstreamConn,
        head: &'a RequestHead,
    ) -> BoxFuture<'a, Result<Bytes, HandshakeError>>;
}

/// Negotiation for forwarded plain-HTTP requests.
///
/// The upstream is itself a proxy and accepts absolute-URI requests as-is,
/// so there is nothing to negotiate. The serialized head (with upstream
/// credentials injected) goes out during the drain, not here.
#[derive(Debug, Default)]
pub struct ForwardingHandshaker;

impl Handshaker for ForwardingHandshaker {
    fn handshake<'a>(
        &'a self,
        _upstream: &'a mut UpstreamConn,
        _head: &'a RequestHead,
    ) -> BoxFuture<'a, Result<Bytes, HandshakeError>> {
        Box::pin(async { Ok(Bytes::new()) })
    }
}

/// Negotiation for CONNECT tunnels.
///
/// Issues a CONNECT for the client's target through the upstream proxy and
/// requires a 2xx response before the tunnel is considered open.
#[derive(Debug, Default)]
pub struct TunnelingHandshaker;

impl Handshaker for TunnelingHandshaker {
    fn handshake<'a>(
        &'a self,
        upstream: &'a mut UpstreamConn,
        head: &'a RequestHead,
    ) -> BoxFuture<'a, Result<Bytes, HandshakeError>> {
        Box::pin(async move {
            let mut request = format!(
                "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n",
                target = head.target
            );
            if let Some(auth) = &upstream.proxy_auth {
                request.push_str("Proxy-Authorization: ");
                request.push_str(auth);
                request.push_str("\r\n");
            }
            request.push_str("\r\n");

            upstream.stream.write_all(request.as_bytes()).await?;

            let mut buf = BytesMut::with_capacity(1024);
            let head_end = loop {
                if let Some(pos) = find_head_end(&buf) {
                    break pos;
                }
                if buf.len() >= MAX_RESPONSE_HEAD {
                    return Err(HandshakeError::ResponseTooLarge);
                }
                let n = upstream.stream.read_buf(&mut buf).await?;
                if n == 0 {
                    return Err(HandshakeError::Closed);
                }
            };

            let status = parse_status(&buf[..head_end])?;
            if !(200..300).contains(&status) {
                return Err(HandshakeError::Rejected(status));
            }

            tracing::debug!(
                endpoint = %upstream.endpoint,
                target = %head.target,
                "Tunnel established through upstream"
            );

            // Bytes past the response head already belong to the tunnel.
            let residual = buf.split_off(head_end);
            Ok(residual.freeze())
        })
    }
}

/// Offset just past the terminating CRLFCRLF, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn parse_status(head: &[u8]) -> Result<u16, HandshakeError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => response.code.ok_or(HandshakeError::Malformed),
        Ok(httparse::Status::Partial) | Err(_) => Err(HandshakeError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::request::RequestHead;
    use tokio::io::duplex;

    fn connect_head(target: &str) -> RequestHead {
        RequestHead {
            method: "CONNECT".into(),
            target: target.into(),
            version: 1,
            headers: vec![("Host".into(), target.as_bytes().to_vec())],
        }
    }

    fn conn_over(
        stream: tokio::io::DuplexStream,
        proxy_auth: Option<&str>,
    ) -> UpstreamConn {
        UpstreamConn {
            stream: Box::new(stream),
            endpoint: "test:0".into(),
            proxy_auth: proxy_auth.map(String::from),
        }
    }

    #[tokio::test]
    async fn tunnel_sends_connect_and_accepts_2xx() {
        let (near, mut far) = duplex(4096);
        let mut conn = conn_over(near, Some("Basic dXA6c2VjcmV0"));
        let head = connect_head("example.com:443");

        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let n = far.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]).to_string();
            far.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            sent
        });

        let residual = TunnelingHandshaker
            .handshake(&mut conn, &head)
            .await
            .unwrap();
        assert!(residual.is_empty());

        let sent = peer.await.unwrap();
        assert!(sent.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(sent.contains("Proxy-Authorization: Basic dXA6c2VjcmV0\r\n"));
        assert!(sent.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn tunnel_rejects_non_2xx() {
        let (near, mut far) = duplex(4096);
        let mut conn = conn_over(near, None);
        let head = connect_head("example.com:443");

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = far.read(&mut buf).await.unwrap();
            far.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let err = TunnelingHandshaker
            .handshake(&mut conn, &head)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(403)));
    }

    #[tokio::test]
    async fn tunnel_preserves_early_payload_bytes() {
        let (near, mut far) = duplex(4096);
        let mut conn = conn_over(near, None);
        let head = connect_head("example.com:443");

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = far.read(&mut buf).await.unwrap();
            far.write_all(b"HTTP/1.1 200 OK\r\n\r\nEARLY").await.unwrap();
        });

        let residual = TunnelingHandshaker
            .handshake(&mut conn, &head)
            .await
            .unwrap();
        assert_eq!(&residual[..], b"EARLY");
    }

    #[tokio::test]
    async fn forwarding_is_a_no_op() {
        let (near, _far) = duplex(64);
        let mut conn = conn_over(near, None);
        let head = connect_head("unused");
        let residual = ForwardingHandshaker
            .handshake(&mut conn, &head)
            .await
            .unwrap();
        assert!(residual.is_empty());
    }
}
