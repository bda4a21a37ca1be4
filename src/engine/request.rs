//! Request head parsing and classification.

use bytes::{BufMut, Bytes, BytesMut};

/// Upper bound on a buffered request head.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Error type for request head parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("connection closed before a complete request head")]
    Truncated,
}

/// How a request head routes through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    /// Absolute-URI plain HTTP, re-serialized and forwarded to the upstream.
    Forwarding,
    /// CONNECT, establishing an opaque byte tunnel.
    Tunneling,
    /// No scheme and not CONNECT: aimed at the proxy itself.
    Admin,
}

/// A parsed client request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent: absolute URI, authority, or origin-form path.
    pub target: String,
    /// Minor HTTP version (1 for HTTP/1.1).
    pub version: u8,
    /// Headers in arrival order. Values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl RequestHead {
    /// Try to parse a complete head from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the head and
    /// the number of bytes it consumed.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(buf)? {
            httparse::Status::Partial => Ok(None),
            httparse::Status::Complete(consumed) => {
                let (Some(method), Some(target), Some(version)) =
                    (request.method, request.path, request.version)
                else {
                    return Err(ParseError::Truncated);
                };

                let head = Self {
                    method: method.to_string(),
                    target: target.to_string(),
                    version,
                    headers: request
                        .headers
                        .iter()
                        .map(|h| (h.name.to_string(), h.value.to_vec()))
                        .collect(),
                };
                Ok(Some((head, consumed)))
            }
        }
    }

    /// Classify the head by method and target shape.
    ///
    /// CONNECT tunnels; an `http://` absolute URI forwards; everything else
    /// (origin-form targets) is aimed at the proxy's own admin surface.
    pub fn classify(&self) -> TrafficClass {
        if self.method.eq_ignore_ascii_case("CONNECT") {
            TrafficClass::Tunneling
        } else if self
            .target
            .get(..7)
            .is_some_and(|p| p.eq_ignore_ascii_case("http://"))
        {
            TrafficClass::Forwarding
        } else {
            TrafficClass::Admin
        }
    }

    /// The `Proxy-Authorization` value, if the client sent one.
    pub fn proxy_authorization(&self) -> Option<String> {
        self.header("proxy-authorization")
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Re-serialize the head for the upstream proxy.
    ///
    /// The client's own `Proxy-Authorization` is stripped; if the upstream
    /// endpoint carries credentials, `upstream_auth` is injected instead.
    pub fn serialize(&self, upstream_auth: Option<&str>) -> Bytes {
        let mut out = BytesMut::with_capacity(256 + self.headers.len() * 48);

        out.put_slice(self.method.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.target.as_bytes());
        out.put_slice(b" HTTP/1.");
        out.put_slice(self.version.to_string().as_bytes());
        out.put_slice(b"\r\n");

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("proxy-authorization") {
                continue;
            }
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value);
            out.put_slice(b"\r\n");
        }

        if let Some(auth) = upstream_auth {
            out.put_slice(b"Proxy-Authorization: ");
            out.put_slice(auth.as_bytes());
            out.put_slice(b"\r\n");
        }

        out.put_slice(b"\r\n");
        out.freeze()
    }
}
