//! Connection protocol engine.
//!
//! # Responsibilities
//! - Own all per-connection state from accept to relay handover
//! - Buffer and classify the client's request head
//! - Gate on authentication before any upstream interaction
//! - Borrow, negotiate, and hand the connection pair to the relay
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → request.rs (head parse + classification)
//!     → security::auth (allow/deny)
//!     → upstream::pool (borrow) → upstream::handshake (negotiate)
//!     → ordered drain of buffered fragments
//!     → net::relay (opaque bytes both ways until teardown)
//! ```
//!
//! # Design Decisions
//! - One engine instance per connection, driven to completion inside one
//!   task; there is no shared mutable state and no locking
//! - Backpressure is achieved by not reading: between head acceptance and
//!   drain completion the engine never touches the client socket, so a
//!   fast client is bounded by the kernel receive buffer
//! - Every suspension point carries a configured timeout; a stalled pool
//!   or upstream closes this connection, never the service

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod request;
pub mod response;
pub mod server;

pub use request::{ParseError, RequestHead, TrafficClass, MAX_HEAD_BYTES};
pub use server::ProxyServer;

use crate::admin;
use crate::config::ProxyConfig;
use crate::net::connection::ConnectionId;
use crate::net::relay::{self, RelayStats};
use crate::routing::Source;
use crate::security::Authenticator;
use crate::upstream::handshake::{
    ForwardingHandshaker, HandshakeError, Handshaker, TunnelingHandshaker,
};
use crate::upstream::pool::{UpstreamConn, UpstreamPool};

static FORWARDING: ForwardingHandshaker = ForwardingHandshaker;
static TUNNELING: TunnelingHandshaker = TunnelingHandshaker;

/// Linear per-connection lifecycle. `Closed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingHead,
    Classifying,
    Authenticating,
    AcquiringUpstream,
    Negotiating,
    Relaying,
    Closed,
}

/// Error type for a connection's trip through the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("client closed before sending a request")]
    ClientClosed,

    #[error("client read failed: {0}")]
    ClientRead(std::io::Error),

    #[error("timed out reading the request head")]
    HeadTimeout,

    #[error("authentication denied for source {0}")]
    AuthDenied(String),

    #[error("no upstream available for source {0}")]
    UpstreamUnavailable(String),

    #[error("timed out borrowing an upstream connection")]
    AcquireTimeout,

    #[error("upstream negotiation failed: {0}")]
    Negotiation(#[from] HandshakeError),

    #[error("timed out negotiating with the upstream")]
    HandshakeTimeout,

    #[error("drain write to upstream failed: {0}")]
    Drain(std::io::Error),

    #[error("write to client failed: {0}")]
    ClientWrite(std::io::Error),
}

/// How a finished connection ended, for the connection log.
#[derive(Debug)]
pub enum EngineOutcome {
    /// The connection reached the relay; counts are per direction.
    Relayed(RelayStats),
    /// The request was aimed at the proxy's own surface.
    AdminDispatched,
}

/// Timeouts for the engine's suspension points.
#[derive(Debug, Clone, Copy)]
pub struct EngineTimeouts {
    pub head_read: Duration,
    pub acquire: Duration,
    pub handshake: Duration,
    pub drain_write: Duration,
}

/// Per-connection settings snapshot, cloned from the loaded config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timeouts: EngineTimeouts,
    pub via: String,
}

impl EngineSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let t = &config.timeouts;
        Self {
            timeouts: EngineTimeouts {
                head_read: Duration::from_secs(t.head_read_secs),
                acquire: Duration::from_secs(t.acquire_secs),
                handshake: Duration::from_secs(t.handshake_secs),
                drain_write: Duration::from_secs(t.drain_write_secs),
            },
            via: config.proxy.via.clone(),
        }
    }
}

/// The per-connection protocol state machine.
///
/// Drives one client connection from raw bytes to a relayed pair. All state
/// lives in this struct and is only touched by the task running [`run`];
/// completions of pool and handshake futures resume here, never elsewhere.
///
/// [`run`]: ProtocolEngine::run
pub struct ProtocolEngine<S> {
    client: S,
    client_ip: IpAddr,
    source: Arc<Source>,
    settings: EngineSettings,
    id: ConnectionId,
    state: EngineState,
    buf: BytesMut,
    /// Fragments received behind the head, replayed to the upstream in
    /// arrival order before the relay takes over.
    queue: VecDeque<Bytes>,
}

impl<S> ProtocolEngine<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(
        client: S,
        client_ip: IpAddr,
        source: Arc<Source>,
        settings: EngineSettings,
        id: ConnectionId,
    ) -> Self {
        Self {
            client,
            client_ip,
            source,
            settings,
            id,
            state: EngineState::AwaitingHead,
            buf: BytesMut::with_capacity(1024),
            queue: VecDeque::new(),
        }
    }

    /// Drive the connection to completion.
    ///
    /// Terminal errors have already been answered on the client socket by
    /// the time this returns; the caller only logs them.
    pub async fn run(
        mut self,
        pool: Arc<dyn UpstreamPool>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<EngineOutcome, EngineError> {
        let head = match self.read_head().await {
            Ok(head) => head,
            Err(error @ EngineError::Parse(_)) => {
                return Err(
                    self.fail(response::bad_request("Unable to parse HTTP request"), error)
                        .await,
                );
            }
            Err(error) => {
                // Nothing useful to tell a client that never spoke.
                self.state = EngineState::Closed;
                return Err(error);
            }
        };

        self.state = EngineState::Classifying;
        let class = head.classify();
        tracing::debug!(
            connection_id = %self.id,
            method = %head.method,
            target = %head.target,
            class = ?class,
            "Request head accepted"
        );

        if class == TrafficClass::Admin {
            admin::dispatch(&head, &mut self.client)
                .await
                .map_err(EngineError::ClientWrite)?;
            self.state = EngineState::Closed;
            return Ok(EngineOutcome::AdminDispatched);
        }

        self.state = EngineState::Authenticating;
        let credential = head.proxy_authorization();
        if !auth.authenticate(&self.source, credential.as_deref(), self.client_ip) {
            let error = EngineError::AuthDenied(self.source.name.clone());
            return Err(self.fail(response::bad_request("auth failed!"), error).await);
        }

        self.state = EngineState::AcquiringUpstream;
        let acquire = self.settings.timeouts.acquire;
        let borrowed = tokio::time::timeout(acquire, pool.borrow(&self.source)).await;
        let mut upstream = match borrowed {
            Ok(Some(upstream)) => upstream,
            Ok(None) => {
                let error = EngineError::UpstreamUnavailable(self.source.name.clone());
                return Err(self.fail(response::bad_gateway(), error).await);
            }
            Err(_) => {
                return Err(self.fail(response::bad_gateway(), EngineError::AcquireTimeout).await);
            }
        };

        self.state = EngineState::Negotiating;
        let handshaker: &dyn Handshaker = match class {
            TrafficClass::Tunneling => &TUNNELING,
            _ => &FORWARDING,
        };
        let budget = self.settings.timeouts.handshake;
        let negotiated =
            tokio::time::timeout(budget, handshaker.handshake(&mut upstream, &head)).await;
        let residual = match negotiated {
            Ok(Ok(residual)) => residual,
            Ok(Err(handshake_error)) => {
                let error = EngineError::Negotiation(handshake_error);
                return Err(self.fail(response::bad_gateway(), error).await);
            }
            Err(_) => {
                return Err(self
                    .fail(response::bad_gateway(), EngineError::HandshakeTimeout)
                    .await);
            }
        };

        match class {
            TrafficClass::Tunneling => self.handover_tunnel(upstream, residual).await,
            _ => self.handover_forwarding(upstream, &head).await,
        }
    }

    /// Read bytes until a complete head parses, within the head-read budget.
    ///
    /// Bytes past the head are queued, never dropped: a pipelining client's
    /// early body fragments replay to the upstream in arrival order.
    async fn read_head(&mut self) -> Result<RequestHead, EngineError> {
        let budget = self.settings.timeouts.head_read;
        match tokio::time::timeout(budget, self.fill_head()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::HeadTimeout),
        }
    }

    async fn fill_head(&mut self) -> Result<RequestHead, EngineError> {
        loop {
            if !self.buf.is_empty() {
                if let Some((head, consumed)) = RequestHead::parse(&self.buf)? {
                    let rest = self.buf.split_off(consumed);
                    if !rest.is_empty() {
                        self.queue.push_back(rest.freeze());
                    }
                    self.buf.clear();
                    return Ok(head);
                }
            }

            if self.buf.len() >= MAX_HEAD_BYTES {
                return Err(EngineError::Parse(ParseError::HeadTooLarge));
            }

            let n = self
                .client
                .read_buf(&mut self.buf)
                .await
                .map_err(EngineError::ClientRead)?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Err(EngineError::ClientClosed)
                } else {
                    Err(EngineError::Parse(ParseError::Truncated))
                };
            }
        }
    }

    /// Tunnel handover: confirm to the client, flush queued bytes in both
    /// directions, then hand the pair to the relay.
    async fn handover_tunnel(
        mut self,
        mut upstream: UpstreamConn,
        residual: Bytes,
    ) -> Result<EngineOutcome, EngineError> {
        let established = response::connection_established(&self.settings.via);
        if let Err(error) = self.client.write_all(&established).await {
            // Upstream tunnel never carries a byte if the confirmation
            // cannot reach the client.
            self.state = EngineState::Closed;
            return Err(EngineError::ClientWrite(error));
        }
        self.client
            .flush()
            .await
            .map_err(EngineError::ClientWrite)?;

        while let Some(fragment) = self.queue.pop_front() {
            self.write_upstream(&mut upstream, fragment).await?;
        }
        if !residual.is_empty() {
            self.client
                .write_all(&residual)
                .await
                .map_err(EngineError::ClientWrite)?;
        }

        self.state = EngineState::Relaying;
        let stats = relay::pair(self.client, upstream.stream).await;
        Ok(EngineOutcome::Relayed(stats))
    }

    /// Forwarding handover: drain the re-serialized head and every buffered
    /// fragment to the upstream in order, then hand the pair to the relay.
    async fn handover_forwarding(
        mut self,
        mut upstream: UpstreamConn,
        head: &RequestHead,
    ) -> Result<EngineOutcome, EngineError> {
        let wire = head.serialize(upstream.proxy_auth.as_deref());
        self.write_upstream(&mut upstream, wire).await?;

        while let Some(fragment) = self.queue.pop_front() {
            self.write_upstream(&mut upstream, fragment).await?;
        }

        self.state = EngineState::Relaying;
        let stats = relay::pair(self.client, upstream.stream).await;
        Ok(EngineOutcome::Relayed(stats))
    }

    /// One ordered drain write, awaited to completion before the next.
    async fn write_upstream(
        &mut self,
        upstream: &mut UpstreamConn,
        fragment: Bytes,
    ) -> Result<(), EngineError> {
        let budget = self.settings.timeouts.drain_write;
        match tokio::time::timeout(budget, upstream.stream.write_all(&fragment)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                self.state = EngineState::Closed;
                Err(EngineError::Drain(error))
            }
            Err(_) => {
                self.state = EngineState::Closed;
                Err(EngineError::Drain(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "drain write timed out",
                )))
            }
        }
    }

    /// Answer the client with `resp`, close, and hand back the error.
    async fn fail(&mut self, resp: Bytes, error: EngineError) -> EngineError {
        tracing::debug!(
            connection_id = %self.id,
            state = ?self.state,
            %error,
            "Connection failing"
        );
        if let Err(write_error) = self.client.write_all(&resp).await {
            tracing::debug!(
                connection_id = %self.id,
                %write_error,
                "Failed to deliver error response"
            );
        }
        let _ = self.client.shutdown().await;
        self.state = EngineState::Closed;
        error
    }
}
