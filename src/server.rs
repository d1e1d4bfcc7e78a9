//! TCP-accepting endpoint and server-scoped registries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::connection::{Conn, ConnPool};
use crate::error::Result;
use crate::router::{HandshakeHandler, HandshakeRouter, OpenHandler, OpenRouter};

/// A WebSocket server: configuration, routing tables, and the connection
/// pool.
///
/// Handlers are registered before serving; the routing tables are
/// read-only once the listener is running.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    pool: ConnPool,
    open_router: OpenRouter,
    handshake_router: HandshakeRouter,
    stats: ServerStats,
}

impl Server {
    /// Create a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            pool: ConnPool::new(),
            open_router: OpenRouter::new(),
            handshake_router: HandshakeRouter::new(),
            stats: ServerStats::default(),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live-connection pool.
    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }

    /// Open-handler registry.
    pub fn open_router(&self) -> &OpenRouter {
        &self.open_router
    }

    /// Handshake-handler registry.
    pub fn handshake_router(&self) -> &HandshakeRouter {
        &self.handshake_router
    }

    /// Aggregate counters.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Register an open handler for `path` (and its trailing-slash alias).
    ///
    /// # Panics
    ///
    /// Panics when the path or its alias is already registered.
    pub fn on_open(&mut self, path: &str, handler: impl OpenHandler + 'static) {
        self.open_router.handle_fn(path, handler);
    }

    /// Register a handshake handler for `path`, overriding the built-in
    /// validator for that path.
    ///
    /// # Panics
    ///
    /// Panics when the path or its alias is already registered.
    pub fn on_handshake(&mut self, path: &str, handler: impl HandshakeHandler + 'static) {
        self.handshake_router.handle_fn(path, handler);
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn listen(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve_listener(listener).await
    }

    /// Accept connections from `listener`, spawning one task per
    /// connection.
    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "listener started");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    self.stats.connection_opened();
                    debug!(addr = %peer, "connection accepted");
                    let conn = Conn::accept(self.clone(), stream, peer);
                    tokio::spawn(conn.serve());
                }
                Err(e) => {
                    debug!(error = %e, "accept error");
                }
            }
        }
    }
}

/// Aggregate server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_total: AtomicU64,
    handshakes_accepted: AtomicU64,
    handshakes_rejected: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ServerStats {
    pub(crate) fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handshake_accepted(&self) {
        self.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self, size: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn message_sent(&self, size: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn bytes_sent(&self, size: usize) {
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Total connections accepted.
    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Handshakes that reached the open state.
    pub fn accepted_handshakes(&self) -> u64 {
        self.handshakes_accepted.load(Ordering::Relaxed)
    }

    /// Handshakes answered with an error response.
    pub fn rejected_handshakes(&self) -> u64 {
        self.handshakes_rejected.load(Ordering::Relaxed)
    }

    /// Whole messages received.
    pub fn received_messages(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Whole messages sent.
    pub fn sent_messages(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::MessageReceiver;
    use crate::sender::MessageSender;

    #[test]
    fn test_server_creation() {
        let server = Server::new(ServerConfig::default());
        assert_eq!(server.pool().count(), 0);
        assert_eq!(server.stats().total_connections(), 0);
    }

    #[test]
    fn test_handler_registration() {
        let mut server = Server::new(ServerConfig::default());
        server.on_open("/echo", |_r: MessageReceiver, _s: MessageSender| async {});
        assert!(server.open_router().has_handler("/echo"));
        assert!(server.open_router().has_handler("/echo/"));
    }

    #[test]
    fn test_stats_counters() {
        let stats = ServerStats::default();
        stats.connection_opened();
        stats.handshake_accepted();
        stats.message_received(10);
        stats.message_sent(20);
        assert_eq!(stats.total_connections(), 1);
        assert_eq!(stats.accepted_handshakes(), 1);
        assert_eq!(stats.rejected_handshakes(), 0);
        assert_eq!(stats.received_messages(), 1);
        assert_eq!(stats.sent_messages(), 1);
    }
}
