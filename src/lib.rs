//! # webweft
//!
//! A server-side WebSocket (RFC 6455) engine: TCP-accepting endpoint,
//! HTTP/1.1 opening handshake, and bidirectional framed message transport
//! with fragmentation, masking, control frames, and orderly closure.
//!
//! ## Features
//!
//! - RFC 6455 frame codec with 7 / 7+16 / 7+64 length forms and masking
//! - Bounded handshake read with header validation and accept-key reply
//! - Whole-message assembly with size caps and UTF-8 checking
//! - Frame-at-a-time streaming APIs behind per-direction monitors
//! - Path-based handler registration with trailing-slash aliasing
//! - Connection pool with monotone, never-reused IDs
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webweft::{MessageReceiver, MessageSender, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> webweft::Result<()> {
//!     let mut server = Server::new(ServerConfig::default());
//!     server.on_open("/", |receiver: MessageReceiver, sender: MessageSender| async move {
//!         while let Ok(msg) = receiver.read_message(1 << 20).await {
//!             if msg.is_close() {
//!                 sender.send_close(1000, "", true, false).await;
//!                 break;
//!             }
//!             let _ = sender.send_message(&msg, false).await;
//!         }
//!     });
//!     Arc::new(server).listen().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod header;
pub mod message;
pub mod receiver;
pub mod router;
pub mod sender;
pub mod server;
pub mod utf8;

pub use config::{LimitsConfig, ProtocolConfig, ServerConfig, TimeoutConfig};
pub use connection::{Conn, ConnPool, ConnState};
pub use error::{Error, Result};
pub use frame::{make_close_frame, CloseCode, Frame, Opcode};
pub use handshake::{make_accept_key, HandshakeReject, HandshakeRequest};
pub use header::Header;
pub use message::Message;
pub use receiver::{FrameReader, MessageReceiver};
pub use router::{HandshakeHandler, OpenHandler};
pub use sender::{FrameWriter, MessageSender};
pub use server::{Server, ServerStats};
