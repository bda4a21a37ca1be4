//! Responses synthesized by the engine itself.
//!
//! Every terminal condition on the client side maps to one of these fixed
//! responses; only the tunnel-established response keeps the connection open.

use bytes::Bytes;

/// 400 with connection-close semantics and a short plain-text body.
pub fn bad_request(body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Connection: close\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        body.len(),
        body
    ))
}

/// 502 for upstream borrow or negotiation failure.
pub fn bad_gateway() -> Bytes {
    bad_gateway_with("upstream unavailable")
}

fn bad_gateway_with(body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 502 Bad Gateway\r\n\
         Connection: close\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        body.len(),
        body
    ))
}

/// 200 answer to a client CONNECT once the upstream tunnel is open.
pub fn connection_established(via: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 200 Connection established\r\n\
         Connection: keep-alive\r\n\
         Via: {}\r\n\
         \r\n",
        via
    ))
}
