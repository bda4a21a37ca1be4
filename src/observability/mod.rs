//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or human-readable)
//! ```
//!
//! # Design Decisions
//! - Structured logging via tracing; every connection event carries the
//!   connection ID as a field
//! - RUST_LOG overrides the configured level

pub mod logging;
