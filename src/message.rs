//! Whole-message type assembled from one or more frames.

use bytes::Bytes;

use crate::frame::Opcode;

/// A complete WebSocket message: the opcode of its initial frame plus the
/// concatenated cleartext payload of every fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub opcode: Opcode,
    /// Concatenated payload.
    pub data: Bytes,
}

impl Message {
    /// Create a text message.
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Text,
            data: data.into(),
        }
    }

    /// Create a binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            data: data.into(),
        }
    }

    /// Whether this is a text message.
    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    /// Whether this is a binary message.
    pub fn is_binary(&self) -> bool {
        self.opcode == Opcode::Binary
    }

    /// Whether this is a close message.
    pub fn is_close(&self) -> bool {
        self.opcode == Opcode::Close
    }

    /// Whether this is a ping message.
    pub fn is_ping(&self) -> bool {
        self.opcode == Opcode::Ping
    }

    /// Whether this is a pong message.
    pub fn is_pong(&self) -> bool {
        self.opcode == Opcode::Pong
    }

    /// Close code carried by a close message, when present.
    pub fn close_code(&self) -> Option<u16> {
        if !self.is_close() || self.data.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    /// Reason text carried by a close message, when present and valid UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        if !self.is_close() || self.data.len() < 2 {
            return None;
        }
        std::str::from_utf8(&self.data[2..]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        assert!(Message::text("hi").is_text());
        assert!(!Message::text("hi").is_binary());
        assert!(Message::binary(vec![1, 2]).is_binary());

        let close = Message {
            opcode: Opcode::Close,
            data: Bytes::new(),
        };
        assert!(close.is_close());
        assert!(!close.is_ping());
        assert!(!close.is_pong());
    }

    #[test]
    fn test_close_code_and_reason() {
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"Going Away");
        let msg = Message {
            opcode: Opcode::Close,
            data: Bytes::from(payload),
        };
        assert_eq!(msg.close_code(), Some(1001));
        assert_eq!(msg.close_reason(), Some("Going Away"));
    }

    #[test]
    fn test_close_code_absent() {
        let empty = Message {
            opcode: Opcode::Close,
            data: Bytes::new(),
        };
        assert_eq!(empty.close_code(), None);
        assert_eq!(empty.close_reason(), None);

        assert_eq!(Message::text("x").close_code(), None);
    }
}
