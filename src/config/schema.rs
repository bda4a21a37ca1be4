//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener-level limits shared by all sources.
    pub listener: ListenerConfig,

    /// Routing sources. Each source owns a client-facing bind address and a
    /// set of upstream proxies that serve it.
    pub sources: Vec<SourceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Proxy behavior knobs.
    pub proxy: ProxySettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Maximum concurrent client connections per source (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
        }
    }
}

/// A routing source: one client-facing endpoint mapped to its upstream proxies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Source identifier for logging and auth policy lookup.
    pub name: String,

    /// Client-facing bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upstream proxy endpoints serving this source.
    pub upstreams: Vec<UpstreamConfig>,

    /// Client authentication policy for this source.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Upstream proxy endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Upstream proxy address (e.g., "10.0.0.5:3128").
    pub address: String,

    /// Username for the upstream proxy's own authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for the upstream proxy's own authentication.
    #[serde(default)]
    pub password: Option<String>,
}

/// Client authentication policy.
///
/// An empty policy (no users, no allowed IPs) admits every client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted Basic credentials.
    pub users: Vec<UserConfig>,

    /// Client IPs admitted without credentials.
    pub allow_ips: Vec<String>,
}

/// A single accepted credential pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

/// Timeout configuration.
///
/// Every asynchronous step of the connection pipeline is bounded so a stalled
/// client or upstream cannot hold resources indefinitely.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for reading the complete request head from the client.
    pub head_read_secs: u64,

    /// Budget for borrowing an upstream connection from the pool.
    pub acquire_secs: u64,

    /// Budget for the upstream handshake exchange.
    pub handshake_secs: u64,

    /// Budget for each buffered-fragment write during the forwarding drain.
    pub drain_write_secs: u64,

    /// Budget for a single TCP connect to an upstream endpoint.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            head_read_secs: 10,
            acquire_secs: 10,
            handshake_secs: 10,
            drain_write_secs: 15,
            connect_secs: 10,
        }
    }
}

/// Proxy behavior knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Token used in the Via header of the tunnel-established response.
    pub via: String,

    /// Set TCP_NODELAY on client and upstream sockets.
    pub tcp_nodelay: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            via: "forward-proxy".to_string(),
            tcp_nodelay: true,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is not set.
    pub log_level: String,

    /// Emit JSON logs instead of the human-readable format.
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}
