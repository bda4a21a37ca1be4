//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (unique source names, unique bind addresses)
//! - Validate value ranges (timeouts > 0, parseable addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function over the config
//! - Runs before the config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no sources configured")]
    NoSources,

    #[error("duplicate source name: {0}")]
    DuplicateSourceName(String),

    // Field is named source_name, not source: thiserror reserves `source`
    // for error chaining.
    #[error("source {source_name}: invalid bind address {address}")]
    InvalidBindAddress { source_name: String, address: String },

    #[error("duplicate bind address: {0}")]
    DuplicateBindAddress(String),

    #[error("source {0}: no upstreams configured")]
    NoUpstreams(String),

    #[error("source {source_name}: upstream address {address} is missing a port")]
    UpstreamMissingPort { source_name: String, address: String },

    #[error("source {source_name}: invalid allow_ips entry {entry}")]
    InvalidAllowIp { source_name: String, entry: String },

    #[error("source {0}: auth user with empty username")]
    EmptyUsername(String),

    #[error("timeout {0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a loaded configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.sources.is_empty() {
        errors.push(ValidationError::NoSources);
    }

    let mut names = HashSet::new();
    let mut binds = HashSet::new();

    for source in &config.sources {
        if !names.insert(source.name.clone()) {
            errors.push(ValidationError::DuplicateSourceName(source.name.clone()));
        }

        match source.bind_address.parse::<SocketAddr>() {
            Ok(_) => {
                if !binds.insert(source.bind_address.clone()) {
                    errors.push(ValidationError::DuplicateBindAddress(
                        source.bind_address.clone(),
                    ));
                }
            }
            Err(_) => errors.push(ValidationError::InvalidBindAddress {
                source_name: source.name.clone(),
                address: source.bind_address.clone(),
            }),
        }

        if source.upstreams.is_empty() {
            errors.push(ValidationError::NoUpstreams(source.name.clone()));
        }

        for upstream in &source.upstreams {
            if !upstream.address.contains(':') {
                errors.push(ValidationError::UpstreamMissingPort {
                    source_name: source.name.clone(),
                    address: upstream.address.clone(),
                });
            }
        }

        for entry in &source.auth.allow_ips {
            if entry.parse::<std::net::IpAddr>().is_err() {
                errors.push(ValidationError::InvalidAllowIp {
                    source_name: source.name.clone(),
                    entry: entry.clone(),
                });
            }
        }

        for user in &source.auth.users {
            if user.username.is_empty() {
                errors.push(ValidationError::EmptyUsername(source.name.clone()));
            }
        }
    }

    let timeouts = [
        ("head_read_secs", config.timeouts.head_read_secs),
        ("acquire_secs", config.timeouts.acquire_secs),
        ("handshake_secs", config.timeouts.handshake_secs),
        ("drain_write_secs", config.timeouts.drain_write_secs),
        ("connect_secs", config.timeouts.connect_secs),
    ];
    for (name, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
