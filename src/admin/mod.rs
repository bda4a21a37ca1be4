//! Administrative dispatch.
//!
//! Requests aimed at the proxy itself (origin-form target, not CONNECT)
//! land here instead of the upstream pipeline. The surface is intentionally
//! minimal: every request is answered with the generic upstream-failure
//! response and the connection is closed.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::engine::request::RequestHead;
use crate::engine::response;

/// Answer a request addressed to the proxy's own surface.
pub async fn dispatch<W>(head: &RequestHead, client: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    tracing::info!(method = %head.method, target = %head.target, "Admin request dispatched");

    client.write_all(&response::bad_gateway()).await?;
    client.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::request::RequestHead;

    #[tokio::test]
    async fn answers_with_generic_failure_and_closes() {
        let head = RequestHead {
            method: "GET".into(),
            target: "/status".into(),
            version: 1,
            headers: vec![],
        };

        let mut out = Vec::new();
        dispatch(&head, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
    }
}
