//! Per-connection state and the server-scoped connection pool.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handshake::HandshakeRequest;
use crate::server::Server;

/// Connection lifecycle state.
///
/// Transitions are monotone: Connecting → Open → (Closing) → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Accepted, handshake not yet complete.
    Connecting = 0,
    /// Handshake accepted, transport active.
    Open = 1,
    /// Teardown in progress.
    Closing = 2,
    /// Stream closed, detached from the pool.
    Closed = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One accepted WebSocket connection.
///
/// Owns the exclusive byte stream split into independently locked buffered
/// halves: the receiver serializes on the read half, the sender on the
/// write half, so receive and send proceed in parallel.
pub struct Conn {
    id: u64,
    state: AtomicU8,
    peer: SocketAddr,
    server: Arc<Server>,
    pub(crate) reader: tokio::sync::Mutex<BufReader<OwnedReadHalf>>,
    pub(crate) writer: tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>,
    handshake: OnceLock<HandshakeRequest>,
}

impl Conn {
    /// Wrap a freshly accepted stream, register it in the pool, and return
    /// the owning handle. The connection starts in `Connecting`.
    pub fn accept(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) -> Arc<Conn> {
        let limits = &server.config().limits;
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::with_capacity(limits.read_buffer_size, read_half);
        let writer = BufWriter::with_capacity(limits.write_buffer_size, write_half);

        let id = server.pool().allocate_id();
        let conn = Arc::new(Conn {
            id,
            state: AtomicU8::new(ConnState::Connecting as u8),
            peer,
            server,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            handshake: OnceLock::new(),
        });
        conn.server.pool().track(&conn);
        conn
    }

    /// Pool-assigned connection ID. Never zero, never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer socket address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Owning server handle.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// The parsed handshake request, once the read phase has completed.
    pub fn handshake_request(&self) -> Option<&HandshakeRequest> {
        self.handshake.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether the connection is open for transport.
    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Write `bytes` through the buffered writer and flush.
    pub(crate) async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let deadline = self.server.config().timeouts.write;
        let mut writer = self.writer.lock().await;
        maybe_timeout(deadline, async {
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok(bytes.len())
        })
        .await
    }

    /// Shut the stream down and detach from the pool.
    pub(crate) async fn close(&self) {
        self.set_state(ConnState::Closing);
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.set_state(ConnState::Closed);
        self.detach();
    }

    /// Remove this connection from the pool. Idempotent.
    pub(crate) fn detach(&self) {
        self.server.pool().remove(self.id);
    }

    /// Respond to a failed handshake and tear the connection down.
    pub(crate) async fn fail_handshake(&self, status: u16, reason: &str) {
        let status_text = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error");
        let response = format!("HTTP/1.1 {status:03} {status_text}\r\n\r\n{reason}\n");
        let _ = self.write(response.as_bytes()).await;
        self.close().await;

        warn!(id = self.id, addr = %self.peer, status, reason, "handshake failed");
    }

    /// Drive the connection: handshake, then hand off to the open handler.
    pub(crate) async fn serve(self: Arc<Self>) {
        let server = self.server.clone();
        let max = server.config().effective_max_handshake_bytes();
        let read_deadline = server.config().timeouts.read;

        let request = {
            let mut reader = self.reader.lock().await;
            maybe_timeout(
                read_deadline,
                HandshakeRequest::read_from(&mut *reader, max),
            )
            .await
        };

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                server.stats().handshake_rejected();
                self.fail_handshake(400, &e.to_string()).await;
                return;
            }
        };

        let path = request.path().to_string();
        let request = self.handshake.get_or_init(|| request);

        if let Err(reject) = server.handshake_router().serve(request, &self).await {
            server.stats().handshake_rejected();
            self.fail_handshake(reject.status, &reject.reason).await;
            return;
        }

        server.stats().handshake_accepted();
        self.set_state(ConnState::Open);
        info!(id = self.id, addr = %self.peer, path = %path, "connection open");

        server.open_router().serve(&path, self.clone()).await;

        // the handler is done; release anything it left open
        if self.state() != ConnState::Closed {
            self.close().await;
        }
        debug!(id = self.id, addr = %self.peer, "connection closed");
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Wrap `fut` in a deadline when one is configured.
pub(crate) async fn maybe_timeout<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| Error::Timeout)?,
        None => fut.await,
    }
}

/// Bookkeeping registry of live connections.
///
/// Assigns monotonically increasing IDs starting at 1 and holds only weak
/// handles; ownership of a connection stays with its task.
#[derive(Debug, Default)]
pub struct ConnPool {
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    conns: HashMap<u64, Weak<Conn>>,
    next_id: u64,
    count: u64,
}

impl ConnPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // bookkeeping must stay available even after a poisoned panic
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve the next connection ID.
    pub(crate) fn allocate_id(&self) -> u64 {
        let mut inner = self.locked();
        inner.next_id += 1;
        inner.next_id
    }

    /// Record a live connection under its ID.
    pub(crate) fn track(&self, conn: &Arc<Conn>) {
        let mut inner = self.locked();
        inner.conns.insert(conn.id, Arc::downgrade(conn));
        inner.count += 1;
    }

    /// Drop the entry for `id`, if still present.
    pub(crate) fn remove(&self, id: u64) {
        let mut inner = self.locked();
        if inner.conns.remove(&id).is_some() {
            inner.count -= 1;
        }
    }

    /// Look up a live connection by ID.
    pub fn get(&self, id: u64) -> Option<Arc<Conn>> {
        self.locked().conns.get(&id).and_then(Weak::upgrade)
    }

    /// Number of tracked connections.
    pub fn count(&self) -> u64 {
        self.locked().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u8() {
        assert_eq!(ConnState::from_u8(0), ConnState::Connecting);
        assert_eq!(ConnState::from_u8(1), ConnState::Open);
        assert_eq!(ConnState::from_u8(2), ConnState::Closing);
        assert_eq!(ConnState::from_u8(3), ConnState::Closed);
    }

    #[test]
    fn test_pool_ids_are_monotone_and_nonzero() {
        let pool = ConnPool::new();
        let a = pool.allocate_id();
        let b = pool.allocate_id();
        let c = pool.allocate_id();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(c, 3);
    }

    #[test]
    fn test_pool_count_tracks_removals() {
        let pool = ConnPool::new();
        let a = pool.allocate_id();
        let b = pool.allocate_id();

        // count moves with tracked entries, not with allocated ids
        assert_eq!(pool.count(), 0);

        let mut inner = pool.inner.lock().unwrap();
        inner.conns.insert(a, Weak::new());
        inner.count += 1;
        inner.conns.insert(b, Weak::new());
        inner.count += 1;
        drop(inner);
        assert_eq!(pool.count(), 2);

        pool.remove(a);
        assert_eq!(pool.count(), 1);
        // removing twice is a no-op
        pool.remove(a);
        assert_eq!(pool.count(), 1);
        pool.remove(b);
        assert_eq!(pool.count(), 0);
    }
}
