//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - In-flight relays finish on their own timeouts; shutdown only stops
//!   new work

pub mod shutdown;

pub use shutdown::Shutdown;
