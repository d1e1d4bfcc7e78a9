//! Path-based registries for handshake and open handlers.
//!
//! Registration happens during setup; routing tables are read-only once
//! the server starts listening.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::warn;

use crate::connection::Conn;
use crate::handshake::{HandshakeReject, HandshakeRequest};
use crate::receiver::MessageReceiver;
use crate::sender::MessageSender;

/// Handler invoked once a connection reaches the open state.
///
/// Closures of the shape `|receiver, sender| async move { ... }` implement
/// this automatically.
pub trait OpenHandler: Send + Sync {
    /// Drive the connection. The connection stays up until a close frame
    /// is sent or the underlying read fails; returning simply ends the
    /// application's interest in it.
    fn serve(&self, receiver: MessageReceiver, sender: MessageSender) -> BoxFuture<'static, ()>;
}

impl<F, Fut> OpenHandler for F
where
    F: Fn(MessageReceiver, MessageSender) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn serve(&self, receiver: MessageReceiver, sender: MessageSender) -> BoxFuture<'static, ()> {
        Box::pin(self(receiver, sender))
    }
}

/// Handler that decides a handshake request for a path.
///
/// On success the handler has written the 101 response itself (usually by
/// delegating to [`crate::handshake::accept`]); on rejection the caller
/// writes the failure response and closes.
pub trait HandshakeHandler: Send + Sync {
    /// Validate the request and, when acceptable, write the 101 response.
    fn serve<'a>(
        &'a self,
        request: &'a HandshakeRequest,
        conn: &'a Arc<Conn>,
    ) -> BoxFuture<'a, std::result::Result<(), HandshakeReject>>;
}

impl<F> HandshakeHandler for F
where
    F: for<'a> Fn(
            &'a HandshakeRequest,
            &'a Arc<Conn>,
        ) -> BoxFuture<'a, std::result::Result<(), HandshakeReject>>
        + Send
        + Sync,
{
    fn serve<'a>(
        &'a self,
        request: &'a HandshakeRequest,
        conn: &'a Arc<Conn>,
    ) -> BoxFuture<'a, std::result::Result<(), HandshakeReject>> {
        self(request, conn)
    }
}

/// Registry of open handlers keyed by exact request path.
#[derive(Default)]
pub struct OpenRouter {
    handlers: HashMap<String, Arc<dyn OpenHandler>>,
}

impl OpenRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `path`.
    ///
    /// A path that does not end in `/` is also registered under its
    /// trailing-slash alias.
    ///
    /// # Panics
    ///
    /// Registering a path (or its alias) twice is a programmer error and
    /// panics.
    pub fn handle_fn(&mut self, path: &str, handler: impl OpenHandler + 'static) {
        let handler: Arc<dyn OpenHandler> = Arc::new(handler);

        let mut paths = vec![path.to_string()];
        if !path.ends_with('/') {
            paths.push(format!("{path}/"));
        }

        for p in &paths {
            assert!(
                !self.handlers.contains_key(p),
                "open handler already registered for path: {p}"
            );
        }
        for p in paths {
            self.handlers.insert(p, handler.clone());
        }
    }

    /// Whether a handler is registered for `path`.
    pub fn has_handler(&self, path: &str) -> bool {
        self.handlers.contains_key(path)
    }

    /// Invoke the handler for `path` on the connection's task, binding a
    /// fresh receiver and sender to the connection.
    pub async fn serve(&self, path: &str, conn: Arc<Conn>) {
        let Some(handler) = self.handlers.get(path) else {
            warn!(id = conn.id(), path, "no open handler for path");
            return;
        };

        let receiver = MessageReceiver::new(conn.clone());
        let sender = MessageSender::new(conn);
        handler.serve(receiver, sender).await;
    }
}

impl std::fmt::Debug for OpenRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouter")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of handshake handlers keyed by exact request path, with the
/// built-in validator as fallback.
#[derive(Default)]
pub struct HandshakeRouter {
    handlers: HashMap<String, Arc<dyn HandshakeHandler>>,
}

impl HandshakeRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handshake handler for `path`, plus its trailing-slash
    /// alias.
    ///
    /// # Panics
    ///
    /// Registering a path (or its alias) twice is a programmer error and
    /// panics.
    pub fn handle_fn(&mut self, path: &str, handler: impl HandshakeHandler + 'static) {
        let handler: Arc<dyn HandshakeHandler> = Arc::new(handler);

        let mut paths = vec![path.to_string()];
        if !path.ends_with('/') {
            paths.push(format!("{path}/"));
        }

        for p in &paths {
            assert!(
                !self.handlers.contains_key(p),
                "handshake handler already registered for path: {p}"
            );
        }
        for p in paths {
            self.handlers.insert(p, handler.clone());
        }
    }

    /// Decide the handshake for `request`, delegating to the handler
    /// registered for its path or to the default validator.
    pub async fn serve(
        &self,
        request: &HandshakeRequest,
        conn: &Arc<Conn>,
    ) -> std::result::Result<(), HandshakeReject> {
        match self.handlers.get(request.path()) {
            Some(handler) => handler.serve(request, conn).await,
            None => crate::handshake::default_handshake(request, conn).await,
        }
    }
}

impl std::fmt::Debug for HandshakeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeRouter")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
