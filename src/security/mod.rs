//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request head accepted:
//!     → auth.rs (Proxy-Authorization + client IP against the source policy)
//!     → allow: continue to upstream acquisition
//!     → deny: 400 response, connection closed, pool never contacted
//! ```
//!
//! # Design Decisions
//! - Authentication happens exactly once per connection, before any
//!   upstream interaction
//! - Fail closed: a credential that cannot be decoded is a denial
//! - Credentials are consumed for the check and not retained

pub mod auth;

pub use auth::{Authenticator, StaticAuthenticator};
