//! Client authentication against a source's policy.
//!
//! # Responsibilities
//! - Decode `Proxy-Authorization: Basic` credentials
//! - Decide admission from (credential, client IP) for a routing source
//!
//! # Design Decisions
//! - The gate is a synchronous predicate; policy lookups are in-memory
//! - An empty policy admits everyone (the source is open)
//! - The IP allowlist admits without credentials; otherwise credentials
//!   must match one configured user exactly

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::routing::Source;

/// Admission decision for an inbound connection.
pub trait Authenticator: Send + Sync {
    /// Returns true when the (credential, client IP) pair may use `source`.
    ///
    /// `credential` is the raw `Proxy-Authorization` header value, if any.
    fn authenticate(&self, source: &Source, credential: Option<&str>, client_ip: IpAddr) -> bool;
}

/// Authenticator backed by the per-source static policy from configuration.
#[derive(Debug, Default)]
pub struct StaticAuthenticator;

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, source: &Source, credential: Option<&str>, client_ip: IpAddr) -> bool {
        if source.users.is_empty() && source.allow_ips.is_empty() {
            return true;
        }

        if source.allow_ips.contains(&client_ip) {
            return true;
        }

        let Some(credential) = credential else {
            tracing::debug!(source = %source.name, client_ip = %client_ip, "Missing proxy credentials");
            return false;
        };

        match parse_basic(credential) {
            Some((username, password)) => source
                .users
                .iter()
                .any(|(u, p)| *u == username && *p == password),
            None => {
                tracing::debug!(source = %source.name, client_ip = %client_ip, "Undecodable proxy credentials");
                false
            }
        }
    }
}

/// Decode a `Basic <base64(user:pass)>` header value.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.trim().strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
