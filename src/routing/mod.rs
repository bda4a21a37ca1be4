//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (local address)
//!     → SourceMap::resolve (cache hit, or lazy build from config)
//!     → Arc<Source> pinned to the connection for its whole life
//! ```
//!
//! # Design Decisions
//! - A source is immutable once resolved for a connection
//! - Resolution is keyed by the listener's local address; sources are built
//!   lazily and cached so repeated accepts on the same port share one Arc
//! - Upstream credentials are pre-encoded at build time, off the hot path

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;

use crate::config::SourceConfig;

/// A resolved routing source: the key identifying which upstream pool and
/// auth policy apply to an inbound connection.
#[derive(Debug)]
pub struct Source {
    /// Source identifier, used as the routing key in logs.
    pub name: String,

    /// Upstream proxy endpoints serving this source.
    pub upstreams: Vec<UpstreamEndpoint>,

    /// Accepted (username, password) pairs. Empty means no credential check.
    pub users: Vec<(String, String)>,

    /// Client IPs admitted without credentials.
    pub allow_ips: Vec<IpAddr>,
}

/// One upstream proxy endpoint with its pre-encoded credentials.
#[derive(Debug, Clone)]
pub struct UpstreamEndpoint {
    /// Upstream proxy address ("host:port").
    pub address: String,

    /// Pre-computed `Basic ...` header value for the upstream's own auth.
    pub proxy_auth: Option<String>,
}

impl Source {
    /// Build a source from its configuration, pre-encoding upstream credentials.
    pub fn from_config(config: &SourceConfig) -> Self {
        let upstreams = config
            .upstreams
            .iter()
            .map(|u| {
                let proxy_auth = match (&u.username, &u.password) {
                    (Some(user), Some(pass)) => {
                        let encoded = BASE64.encode(format!("{}:{}", user, pass));
                        Some(format!("Basic {}", encoded))
                    }
                    _ => None,
                };
                UpstreamEndpoint {
                    address: u.address.clone(),
                    proxy_auth,
                }
            })
            .collect();

        let users = config
            .auth
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();

        let allow_ips = config
            .auth
            .allow_ips
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(source = %config.name, entry = %s, "Ignoring unparseable allow_ips entry");
                    None
                }
            })
            .collect();

        Self {
            name: config.name.clone(),
            upstreams,
            users,
            allow_ips,
        }
    }
}

/// Maps an accepted connection to its routing source.
///
/// Sources are built lazily on first use and cached by the listener's local
/// address, so every connection accepted on a port shares the same `Arc<Source>`.
#[derive(Debug)]
pub struct SourceMap {
    configs: Vec<SourceConfig>,
    cache: DashMap<SocketAddr, Arc<Source>>,
}

impl SourceMap {
    /// Create a mapping over the configured sources.
    pub fn new(configs: Vec<SourceConfig>) -> Self {
        Self {
            configs,
            cache: DashMap::new(),
        }
    }

    /// Resolve the source for a connection accepted on `local_addr`.
    ///
    /// An exact bind-address match wins; a wildcard bind (`0.0.0.0`/`::`)
    /// matches by port alone. Returns `None` when no configured source
    /// covers the address.
    pub fn resolve(&self, local_addr: SocketAddr) -> Option<Arc<Source>> {
        if let Some(source) = self.cache.get(&local_addr) {
            return Some(Arc::clone(&source));
        }

        let mut binds = self
            .configs
            .iter()
            .filter_map(|c| Some((c, c.bind_address.parse::<SocketAddr>().ok()?)));

        let config = binds
            .clone()
            .find(|(_, bind)| *bind == local_addr)
            .or_else(|| {
                binds.find(|(_, bind)| {
                    bind.ip().is_unspecified() && bind.port() == local_addr.port()
                })
            })
            .map(|(config, _)| config)?;

        let source = Arc::new(Source::from_config(config));
        self.cache.insert(local_addr, Arc::clone(&source));
        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, UpstreamConfig, UserConfig};

    fn source_config(name: &str, bind: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            bind_address: bind.into(),
            upstreams: vec![UpstreamConfig {
                address: "10.0.0.5:3128".into(),
                username: Some("up".into()),
                password: Some("secret".into()),
            }],
            auth: AuthConfig {
                users: vec![UserConfig {
                    username: "client".into(),
                    password: "pw".into(),
                }],
                allow_ips: vec!["127.0.0.1".into()],
            },
        }
    }

    #[test]
    fn precomputes_upstream_basic_auth() {
        let source = Source::from_config(&source_config("s1", "0.0.0.0:8080"));
        // "up:secret" in base64
        assert_eq!(
            source.upstreams[0].proxy_auth.as_deref(),
            Some("Basic dXA6c2VjcmV0")
        );
        assert_eq!(source.allow_ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn resolve_matches_by_port_and_caches() {
        let map = SourceMap::new(vec![
            source_config("a", "0.0.0.0:8080"),
            source_config("b", "0.0.0.0:9090"),
        ]);

        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let first = map.resolve(addr).unwrap();
        assert_eq!(first.name, "b");

        let second = map.resolve(addr).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn resolve_prefers_exact_bind_over_shared_port() {
        let map = SourceMap::new(vec![
            source_config("alpha", "127.0.0.1:8080"),
            source_config("beta", "10.0.0.1:8080"),
        ]);

        let beta = map.resolve("10.0.0.1:8080".parse().unwrap()).unwrap();
        assert_eq!(beta.name, "beta");
        let alpha = map.resolve("127.0.0.1:8080".parse().unwrap()).unwrap();
        assert_eq!(alpha.name, "alpha");
    }

    #[test]
    fn wildcard_bind_matches_any_local_ip() {
        let map = SourceMap::new(vec![source_config("any", "0.0.0.0:9090")]);
        let source = map.resolve("192.168.1.5:9090".parse().unwrap()).unwrap();
        assert_eq!(source.name, "any");
        assert!(map.resolve("192.168.1.5:9091".parse().unwrap()).is_none());
    }

    #[test]
    fn resolve_unknown_port_is_none() {
        let map = SourceMap::new(vec![source_config("a", "0.0.0.0:8080")]);
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert!(map.resolve(addr).is_none());
    }
}
