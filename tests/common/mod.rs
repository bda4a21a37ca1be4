//! Shared harness for engine integration tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;

use forward_proxy::engine::{EngineSettings, EngineTimeouts};
use forward_proxy::routing::Source;
use forward_proxy::upstream::pool::{UpstreamConn, UpstreamPool};

/// Pool that hands out pre-scripted connections and counts borrows.
///
/// An optional gate holds every borrow until the test releases a permit,
/// so a test can observe engine behavior while acquisition is pending.
pub struct ScriptedPool {
    conns: Mutex<Vec<UpstreamConn>>,
    pub borrows: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedPool {
    pub fn with_conn(
        stream: impl AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
        proxy_auth: Option<&str>,
    ) -> Self {
        Self {
            conns: Mutex::new(vec![UpstreamConn {
                stream: Box::new(stream),
                endpoint: "scripted:0".into(),
                proxy_auth: proxy_auth.map(String::from),
            }]),
            borrows: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            conns: Mutex::new(Vec::new()),
            borrows: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(
        stream: impl AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
        proxy_auth: Option<&str>,
        gate: Arc<Semaphore>,
    ) -> Self {
        let mut pool = Self::with_conn(stream, proxy_auth);
        pool.gate = Some(gate);
        pool
    }

    pub fn borrow_count(&self) -> usize {
        self.borrows.load(Ordering::SeqCst)
    }
}

impl UpstreamPool for ScriptedPool {
    fn borrow<'a>(&'a self, _source: &'a Source) -> BoxFuture<'a, Option<UpstreamConn>> {
        Box::pin(async move {
            self.borrows.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.ok()?;
                permit.forget();
            }
            self.conns.lock().unwrap().pop()
        })
    }
}

/// Source accepting `user:pass` Basic credentials.
pub fn test_source() -> Arc<Source> {
    Arc::new(Source {
        name: "test".into(),
        upstreams: Vec::new(),
        users: vec![("user".into(), "pass".into())],
        allow_ips: Vec::new(),
    })
}

/// Source with no credential policy at all.
pub fn open_source() -> Arc<Source> {
    Arc::new(Source {
        name: "open".into(),
        upstreams: Vec::new(),
        users: Vec::new(),
        allow_ips: Vec::new(),
    })
}

pub fn client_ip() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        timeouts: EngineTimeouts {
            head_read: Duration::from_secs(5),
            acquire: Duration::from_secs(5),
            handshake: Duration::from_secs(5),
            drain_write: Duration::from_secs(5),
        },
        via: "forward-proxy".into(),
    }
}

/// "user:pass" as a Proxy-Authorization value.
pub const GOOD_CREDENTIAL: &str = "Basic dXNlcjpwYXNz";

/// Read until the buffer contains a blank line. Panics on premature EOF.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before end of head: {:?}", String::from_utf8_lossy(&out));
        out.extend_from_slice(&chunk[..n]);
        if out.windows(4).any(|w| w == b"\r\n\r\n") {
            return out;
        }
    }
}

/// Read exactly `n` bytes.
pub async fn read_exactly<S: AsyncRead + Unpin>(stream: &mut S, n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    stream.read_exact(&mut out).await.unwrap();
    out
}
