//! `LobbyforgeServer` builder and server loop.
//!
//! This is the entry point for running a Lobbyforge server. It ties the
//! layers together: transport → protocol → collaborators → store →
//! lobby.

use std::sync::Arc;

use lobbyforge_lobby::{MatchFlow, RematchCoordinator, RoleAssigner, SessionRegistry};
use lobbyforge_protocol::JsonCodec;
use lobbyforge_session::{Authenticator, GameRecords, InviteGuard};
use lobbyforge_store::SharedStateStore;
use lobbyforge_transport::{Transport, WebSocketTransport};

use crate::LobbyforgeError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;

/// Shared server state passed to each connection handler task.
///
/// Holds the injected collaborators and store handle. The registry is
/// the only process-local map, and it only holds this process's live
/// channels.
pub(crate) struct ServerState<A, I, R, S> {
    pub(crate) auth: A,
    pub(crate) invites: I,
    pub(crate) records: Arc<R>,
    pub(crate) store: Arc<S>,
    pub(crate) registry: SessionRegistry,
    pub(crate) roles: RoleAssigner<S>,
    pub(crate) flow: MatchFlow<S, R>,
    pub(crate) rematch: RematchCoordinator<S, R>,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Lobbyforge server.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use lobbyforge::prelude::*;
///
/// let server = LobbyforgeServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(
///         my_auth,
///         MemoryInviteGuard::new(),
///         Arc::new(MemoryGameRecords::default()),
///         Arc::new(MemoryStore::new()),
///     )
///     .await?;
/// server.run().await
/// ```
pub struct LobbyforgeServerBuilder {
    bind_addr: String,
    config: ServerConfig,
}

impl LobbyforgeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener and wires the collaborators together.
    pub async fn build<A, I, R, S>(
        self,
        auth: A,
        invites: I,
        records: Arc<R>,
        store: Arc<S>,
    ) -> Result<LobbyforgeServer<A, I, R, S>, LobbyforgeError>
    where
        A: Authenticator,
        I: InviteGuard,
        R: GameRecords,
        S: SharedStateStore,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            auth,
            invites,
            roles: RoleAssigner::new(Arc::clone(&store)),
            flow: MatchFlow::new(Arc::clone(&store), Arc::clone(&records)),
            rematch: RematchCoordinator::new(Arc::clone(&store), Arc::clone(&records))
                .with_retention(self.config.retention),
            records,
            store,
            registry: SessionRegistry::new(),
            codec: JsonCodec,
            config: self.config,
        });

        Ok(LobbyforgeServer { transport, state })
    }
}

impl Default for LobbyforgeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Lobbyforge server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct LobbyforgeServer<A, I, R, S> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, I, R, S>>,
}

impl LobbyforgeServer<(), (), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> LobbyforgeServerBuilder {
        LobbyforgeServerBuilder::new()
    }
}

impl<A, I, R, S> LobbyforgeServer<A, I, R, S>
where
    A: Authenticator,
    I: InviteGuard,
    R: GameRecords,
    S: SharedStateStore,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), LobbyforgeError> {
        tracing::info!(instance = %self.state.config.instance_id, "Lobbyforge server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
