//! Crate-wide error types.

use thiserror::Error;

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or driving a WebSocket connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or oversized opening handshake.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// WebSocket-level protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unknown opcode nibble in a frame header.
    #[error("deformed opcode {0:#03x}")]
    BadOpcode(u8),

    /// Declared frame payload exceeds the configured cap.
    #[error("frame too large: {len} bytes (cap {max})")]
    FrameTooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured cap.
        max: u64,
    },

    /// Accumulated message payload exceeds the configured cap.
    #[error("message too large: {len} bytes (cap {max})")]
    MessageTooLarge {
        /// Running payload total.
        len: u64,
        /// Configured cap.
        max: u64,
    },

    /// Data frame arrived unmasked from the peer (RFC 6455 requires
    /// client-to-server frames to be masked).
    #[error("unmasked data frame from peer")]
    UnmaskedFrame,

    /// Operation attempted while the connection is not open.
    #[error("connection is not open")]
    NotOpen,

    /// Text payload is not well-formed UTF-8.
    #[error("invalid UTF-8 in text payload")]
    Utf8,

    /// Codepoint outside the encodable range.
    #[error("invalid unicode scalar {0:#x}")]
    BadScalar(u32),

    /// A read or write exceeded its configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Protocol("bad frame".to_string());
        assert!(err.to_string().contains("protocol error"));

        let err = Error::FrameTooLarge { len: 2048, max: 1024 };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));

        let err = Error::BadOpcode(0x3);
        assert!(err.to_string().contains("0x3"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
