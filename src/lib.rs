//! Forward proxy connection core.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                FORWARD PROXY                  │
//!                      │                                               │
//!   Client Request     │  ┌─────────┐   ┌─────────┐   ┌────────────┐  │
//!   ───────────────────┼─▶│   net   │──▶│ engine  │──▶│  security  │  │
//!                      │  │listener │   │ (head)  │   │   (auth)   │  │
//!                      │  └─────────┘   └────┬────┘   └─────┬──────┘  │
//!                      │                     │              │          │
//!                      │                     ▼              ▼          │
//!                      │              ┌────────────┐ ┌────────────┐   │
//!                      │              │  routing   │ │  upstream  │   │
//!                      │              │ (sources)  │ │pool + shake│   │
//!                      │              └────────────┘ └─────┬──────┘   │
//!                      │                                   │          │
//!   Relayed bytes      │  ┌──────────────────────────┐     │          │
//!   ◀──────────────────┼──│       net::relay         │◀────┘          │
//!                      │  └──────────────────────────┘                │
//!                      │                                               │
//!                      │  config · observability · lifecycle · admin  │
//!                      └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod engine;
pub mod net;
pub mod routing;
pub mod upstream;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use engine::{EngineSettings, ProtocolEngine, ProxyServer};
pub use lifecycle::Shutdown;
