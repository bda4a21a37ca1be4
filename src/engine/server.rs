//! Server assembly: one accept loop per source, one task per connection.
//!
//! # Responsibilities
//! - Bind a listener for every configured source
//! - Resolve the routing source and spawn an engine per accepted connection
//! - Stop accepting on shutdown and wait for in-flight connections

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use crate::config::ProxyConfig;
use crate::engine::{EngineError, EngineOutcome, EngineSettings, ProtocolEngine};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::routing::{Source, SourceMap};
use crate::security::{Authenticator, StaticAuthenticator};
use crate::upstream::pool::{TcpUpstreamPool, UpstreamPool};

/// Error type for server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Handles shared by every accept loop and connection task.
#[derive(Clone)]
struct ServerContext {
    source_map: Arc<SourceMap>,
    pool: Arc<dyn UpstreamPool>,
    auth: Arc<dyn Authenticator>,
    settings: EngineSettings,
    tracker: ConnectionTracker,
    tcp_nodelay: bool,
}

/// The proxy server: owns the listeners and the connection tasks they spawn.
pub struct ProxyServer {
    config: ProxyConfig,
    shutdown: Arc<Shutdown>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, shutdown: Arc<Shutdown>) -> Self {
        Self {
            config,
            shutdown,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Bind all listeners and serve until shutdown triggers, then drain.
    pub async fn run(&self) -> Result<(), ServerError> {
        let connection_limit = Arc::new(Semaphore::new(self.config.listener.max_connections));
        let context = ServerContext {
            source_map: Arc::new(SourceMap::new(self.config.sources.clone())),
            pool: Arc::new(TcpUpstreamPool::new(Duration::from_secs(
                self.config.timeouts.connect_secs,
            ))),
            auth: Arc::new(StaticAuthenticator),
            settings: EngineSettings::from_config(&self.config),
            tracker: self.tracker.clone(),
            tcp_nodelay: self.config.proxy.tcp_nodelay,
        };

        let mut accept_tasks = Vec::with_capacity(self.config.sources.len());
        for source in &self.config.sources {
            let listener =
                Listener::bind(&source.bind_address, Arc::clone(&connection_limit)).await?;
            tracing::info!(source = %source.name, bind = %source.bind_address, "Source serving");

            let shutdown_rx = self.shutdown.subscribe();
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                context.clone(),
                shutdown_rx,
            )));
        }

        for task in accept_tasks {
            let _ = task.await;
        }

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, "Waiting for in-flight connections");
        }
        self.tracker.wait_for_drain().await;
        tracing::info!("All connections drained");
        Ok(())
    }

    /// Current number of in-flight connections.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

async fn accept_loop(
    listener: Listener,
    context: ServerContext,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer_addr, permit) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        tracing::warn!(%error, "Accept failed");
                        continue;
                    }
                };

                let local_addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(error) => {
                        tracing::warn!(%error, "Listener lost its local address");
                        continue;
                    }
                };

                let Some(source) = context.source_map.resolve(local_addr) else {
                    tracing::warn!(%local_addr, "No source configured for listener");
                    continue;
                };

                if context.tcp_nodelay {
                    if let Err(error) = stream.set_nodelay(true) {
                        tracing::debug!(%error, "Failed to set TCP_NODELAY on client socket");
                    }
                }

                let guard = context.tracker.track();
                tokio::spawn(handle_connection(
                    stream,
                    peer_addr.ip(),
                    source,
                    context.clone(),
                    permit,
                    guard,
                ));
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    client_ip: std::net::IpAddr,
    source: Arc<Source>,
    context: ServerContext,
    permit: ConnectionPermit,
    guard: ConnectionGuard,
) {
    let id = guard.id();
    let engine = ProtocolEngine::new(stream, client_ip, source, context.settings.clone(), id);

    match engine.run(context.pool, context.auth).await {
        Ok(EngineOutcome::Relayed(stats)) => {
            tracing::info!(
                connection_id = %id,
                client_to_upstream = stats.client_to_upstream,
                upstream_to_client = stats.upstream_to_client,
                "Connection relayed and closed"
            );
        }
        Ok(EngineOutcome::AdminDispatched) => {
            tracing::info!(connection_id = %id, "Admin request answered");
        }
        Err(EngineError::ClientClosed) => {
            tracing::debug!(connection_id = %id, "Client closed without a request");
        }
        Err(error) => {
            tracing::warn!(connection_id = %id, %error, "Connection terminated");
        }
    }

    drop(permit);
}
