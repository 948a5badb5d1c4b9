//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌── EventLog (RwLock)
//!             ├── /ws ── Session ───┤
//! Client B ──┘   (one task each)    └── ConnectionRegistry (Mutex)
//!                                             │
//!                              ┌──────────────┼──────────────┐
//!                              ▼              ▼              ▼
//!                           Client A       Client B       Client C
//! ```
//!
//! The listener accepts TCP connections forever. Each connection is upgraded
//! at the configured path and handed to its own session task; nothing a
//! single peer does can stop the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::context::{RelayContext, RelayPolicy, ServerStats};
use crate::error::{RelayError, Result};
use crate::session::run_session;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Request path that accepts the WebSocket upgrade
    pub ws_path: String,
    /// Assign identities and announce departures
    pub track_identity: bool,
    /// Echo events back to their sender
    pub echo_to_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            ws_path: "/ws".to_string(),
            track_identity: true,
            echo_to_sender: true,
        }
    }
}

impl ServerConfig {
    pub fn policy(&self) -> RelayPolicy {
        RelayPolicy {
            track_identity: self.track_identity,
            echo_to_sender: self.echo_to_sender,
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    ctx: Arc<RelayContext>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let ctx = Arc::new(RelayContext::new(config.policy()));
        Self { config, ctx }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until the process exits.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => log::info!("Relay listening on ws://{addr}{}", self.config.ws_path),
            Err(e) => log::warn!("Relay listening on unknown address: {e}"),
        }

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Accept error: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let ctx = self.ctx.clone();
            let path = self.config.ws_path.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, ctx, path).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Upgrade one TCP connection and run its session.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: Arc<RelayContext>,
        path: String,
    ) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {addr}: {e}");
        }

        let check_path = move |req: &Request, resp: Response| {
            if req.uri().path() == path {
                Ok(resp)
            } else {
                let mut reject =
                    ErrorResponse::new(Some(format!("No endpoint at {}", req.uri().path())));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
            .await
            .map_err(RelayError::Handshake)?;
        log::debug!("WebSocket connection established from {addr}");

        run_session(ctx, ws, addr).await;
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.ctx.stats().await
    }

    /// Shared relay state.
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
