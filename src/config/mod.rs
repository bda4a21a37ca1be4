//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! TOML file
//!     → loader.rs (read + deserialize)
//!     → validation.rs (semantic checks, all errors reported)
//!     → ProxyConfig handed to the server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once accepted; sources are resolved lazily from it
//! - Every timeout the pipeline uses comes from here, with defaults

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, ProxySettings, SourceConfig,
    TimeoutConfig, UpstreamConfig, UserConfig,
};
