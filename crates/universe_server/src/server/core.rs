//! Core universe server implementation.
//!
//! This module contains the main `UniverseServer` struct: it owns the node,
//! binds the websocket listener and runs the accept loops that hand every
//! new connection to [`handle_connection`].

use crate::{
    config::ServerConfig,
    connection::ConnectionManager,
    error::ServerError,
    security::{Hs256Verifier, TokenVerifier},
    server::handlers::{handle_connection, ConnectionContext},
};
use futures::stream::{FuturesUnordered, StreamExt as FuturesStreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use universe::{Node, ShutdownState, UniverseContext};

/// The universe server.
///
/// `UniverseServer` accepts websocket clients, admits them through the
/// handshake and serves them against its [`Node`]. All world state lives in
/// the node; the server only moves frames.
///
/// # Architecture
///
/// * **Node**: registry of worlds sessions are spawned into
/// * **Connection Management**: bookkeeping of every open websocket
/// * **Token Verification**: pluggable check of handshake tokens
/// * **Multi-task Accepting**: several accept loops share one listener
pub struct UniverseServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Worlds and the shared universe context
    node: Arc<Node>,

    /// Manager for client connections
    connection_manager: Arc<ConnectionManager>,

    /// Checks handshake tokens
    verifier: Arc<dyn TokenVerifier>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl UniverseServer {
    /// Creates a server backed by an in-memory universe.
    pub fn new(config: ServerConfig) -> Self {
        let node = Node::new(UniverseContext::in_memory(config.universe.clone()));
        Self::with_node(config, node)
    }

    /// Creates a server serving an existing node.
    ///
    /// Tokens are verified as HS256 under `config.security.jwt_secret`.
    pub fn with_node(config: ServerConfig, node: Arc<Node>) -> Self {
        let verifier = Arc::new(Hs256Verifier::new(&config.security.jwt_secret));
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            node,
            connection_manager: Arc::new(ConnectionManager::new()),
            verifier,
            shutdown_sender,
        }
    }

    /// Replaces the token verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// Binds the configured address and serves until shutdown is initiated.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, Some(shutdown_state)).await
    }

    /// Binds the configured address and serves until [`UniverseServer::shutdown`].
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, None).await
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))
    }

    /// Serves connections from an already bound listener.
    ///
    /// # Startup Sequence
    ///
    /// 1. Load or create the spawn world and start the node. A shutdown
    ///    requested meanwhile ends `serve` before any accept loop starts
    /// 2. Start the accept loops, all sharing `listener`
    /// 3. Run until an accept loop fails, [`UniverseServer::shutdown`] is
    ///    called or `shutdown_state` is initiated
    /// 4. Close every open connection
    ///
    /// Stopping the node is left to the caller.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_state: Option<ShutdownState>,
    ) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(e.to_string()))?;
        info!("🚀 Starting universe server on {}", local_addr);

        let spawn_world = self.node.ensure_spawn_world().await?;
        info!("🌍 Spawn world: {}", spawn_world.id());
        self.node.run().await;

        if shutdown_receiver.try_recv().is_ok() {
            info!("Shutdown requested during startup");
            return Ok(());
        }

        let core_count = num_cpus::get();
        let num_acceptors = self.config.acceptor_count();
        info!("🧠 Detected {} CPU cores, using {} acceptor(s)", core_count, num_acceptors);

        let listener = Arc::new(listener);

        let mut accept_futures = (0..num_acceptors)
            .map(|acceptor| {
                let listener = Arc::clone(&listener);
                let ctx = self.connection_context();
                let shutdown_state = shutdown_state.clone();

                async move {
                    loop {
                        if let Some(ref shutdown_state) = shutdown_state {
                            if shutdown_state.is_shutdown_initiated() {
                                info!("🛑 Accept loop {} stopping - shutdown initiated", acceptor);
                                break;
                            }
                        }

                        match listener.accept().await {
                            Ok((stream, addr)) => {
                                if ctx.connections.connection_count().await >= ctx.config.max_connections {
                                    warn!("🚫 Refusing {}: {} connections open", addr, ctx.config.max_connections);
                                    continue;
                                }
                                let ctx = ctx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, ctx).await {
                                        debug!("Connection from {} ended: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                                break;
                            }
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        let initiated = async {
            match &shutdown_state {
                Some(state) => state.initiated().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = accept_futures.next() => {}
            _ = shutdown_receiver.recv() => {
                info!("Internal shutdown signal received");
            }
            _ = initiated => {
                info!("🛑 Accept loops stopping - shutdown initiated");
            }
        }

        info!("🧹 Performing server cleanup...");
        self.connection_manager.close_all("Server shutting down").await;
        info!("✅ Server cleanup completed");
        Ok(())
    }

    /// Asks [`UniverseServer::serve`] to stop accepting.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            node: Arc::clone(&self.node),
            connections: Arc::clone(&self.connection_manager),
            verifier: Arc::clone(&self.verifier),
            config: Arc::clone(&self.config),
        }
    }
}
