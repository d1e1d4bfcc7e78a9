//! RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Decoded frames always hold the cleartext payload; masking is applied
//! only on the wire.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation frame.
    Continuation,
    /// Text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Close frame.
    Close,
    /// Ping frame.
    Ping,
    /// Pong frame.
    Pong,
}

impl Opcode {
    /// Check if this is a control frame.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Check if this is a data frame.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text | Self::Binary | Self::Continuation)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::BadOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// WebSocket close codes as defined in RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure.
    Normal,
    /// Endpoint going away.
    GoingAway,
    /// Protocol error.
    Protocol,
    /// Unsupported data type.
    Unsupported,
    /// No status received.
    NoStatus,
    /// Abnormal closure.
    Abnormal,
    /// Invalid frame payload data.
    InvalidData,
    /// Policy violation.
    PolicyViolation,
    /// Message too big.
    MessageTooBig,
    /// Missing extension.
    MandatoryExt,
    /// Internal server error.
    InternalError,
    /// TLS handshake failure.
    TlsHandshake,
    /// Custom close code.
    Custom(u16),
}

impl CloseCode {
    /// Canonical reason text for this code.
    pub fn text(&self) -> &'static str {
        match self {
            Self::Normal => "Normal Closure",
            Self::GoingAway => "Going Away",
            Self::Protocol => "Protocol error",
            Self::Unsupported => "Unsupported Data",
            Self::NoStatus => "No Status Rcvd",
            Self::Abnormal => "Abnormal Closure",
            Self::InvalidData => "Invalid frame payload data",
            Self::PolicyViolation => "Policy Violation",
            Self::MessageTooBig => "Message Too Big",
            Self::MandatoryExt => "Mandatory Ext",
            Self::InternalError => "Internal Server Error",
            Self::TlsHandshake => "TLS handshake",
            Self::Custom(_) => "",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        match value {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidData,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExt,
            1011 => Self::InternalError,
            1015 => Self::TlsHandshake,
            code => Self::Custom(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(value: CloseCode) -> Self {
        match value {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExt => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Custom(code) => code,
        }
    }
}

/// A single decoded WebSocket frame.
///
/// `payload` is always the cleartext; any wire masking has been removed
/// during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Reserved bit 1 (no extension negotiates its use).
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Declared payload length.
    pub payload_len: u64,
    /// Masking key as received, when `masked` is set.
    pub masking_key: Option<[u8; 4]>,
    /// Cleartext payload.
    pub payload: Bytes,
}

impl Frame {
    /// Build a final data frame with the given opcode and payload.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload_len: payload.len() as u64,
            masking_key: None,
            payload,
        }
    }

    /// Decode one frame from the stream.
    ///
    /// Reads the 2-byte header, the extended length (2 or 8 bytes for the
    /// 126/127 forms), the masking key when MASK is set, and exactly
    /// `payload_len` payload bytes, unmasking them in place. Fails with
    /// [`Error::FrameTooLarge`] when the declared length exceeds
    /// `max_payload_len`.
    pub async fn read_from<R>(reader: &mut R, max_payload_len: u64) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        read_exact_or(reader, &mut head, "first two bytes of frame").await?;

        let fin = head[0] >> 7 == 1;
        let rsv1 = head[0] >> 6 & 1 == 1;
        let rsv2 = head[0] >> 5 & 1 == 1;
        let rsv3 = head[0] >> 4 & 1 == 1;
        let opcode = Opcode::try_from(head[0] & 0xF)?;

        let masked = head[1] >> 7 == 1;
        let len7 = head[1] & 0x7F;

        let payload_len = match len7 {
            0..=125 => u64::from(len7),
            126 => {
                let mut ext = [0u8; 2];
                read_exact_or(reader, &mut ext, "extended payload length").await?;
                u64::from(u16::from_be_bytes(ext))
            }
            127 => {
                let mut ext = [0u8; 8];
                read_exact_or(reader, &mut ext, "extended payload length").await?;
                u64::from_be_bytes(ext)
            }
            _ => unreachable!("len7 is 7 bits"),
        };

        if payload_len > max_payload_len {
            return Err(Error::FrameTooLarge {
                len: payload_len,
                max: max_payload_len,
            });
        }

        let masking_key = if masked {
            let mut key = [0u8; 4];
            read_exact_or(reader, &mut key, "masking key").await?;
            Some(key)
        } else {
            None
        };

        let payload = if payload_len > 0 {
            let len = usize::try_from(payload_len).map_err(|_| Error::FrameTooLarge {
                len: payload_len,
                max: max_payload_len,
            })?;
            let mut data = vec![0u8; len];
            read_exact_or(reader, &mut data, "payload data").await?;
            if let Some(key) = masking_key {
                apply_mask(&mut data, key);
            }
            Bytes::from(data)
        } else {
            Bytes::new()
        };

        Ok(Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masked,
            payload_len,
            masking_key,
            payload,
        })
    }

    /// Encode this frame into wire bytes.
    ///
    /// When `mask` is set, a fresh random masking key is generated and the
    /// payload is XORed with it on the way out; the stored payload stays
    /// cleartext.
    pub fn to_bytes(&self, mask: bool) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut out = Vec::with_capacity(payload_len + 14);

        out.push(
            u8::from(self.fin) << 7
                | u8::from(self.rsv1) << 6
                | u8::from(self.rsv2) << 5
                | u8::from(self.rsv3) << 4
                | u8::from(self.opcode),
        );

        let len7 = if payload_len <= 125 {
            payload_len as u8
        } else if payload_len <= usize::from(u16::MAX) {
            126
        } else {
            127
        };
        out.push(u8::from(mask) << 7 | len7);

        if len7 == 126 {
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else if len7 == 127 {
            out.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        if mask {
            let key: [u8; 4] = rand::random();
            out.extend_from_slice(&key);
            let mut data = self.payload.to_vec();
            apply_mask(&mut data, key);
            out.extend_from_slice(&data);
        } else {
            out.extend_from_slice(&self.payload);
        }

        out
    }
}

/// Build a close frame: big-endian close code followed by the UTF-8 reason.
///
/// When `reason` is empty and `use_code_text` is set, the canonical text
/// for `code` is substituted.
pub fn make_close_frame(code: u16, reason: &str, use_code_text: bool) -> Frame {
    let reason = if reason.is_empty() && use_code_text {
        CloseCode::from(code).text()
    } else {
        reason
    };

    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());

    Frame::new(Opcode::Close, payload)
}

/// XOR `data` in place with the masking key, cycling byte by byte.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

async fn read_exact_or<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Protocol(format!("deformed {what}"))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8], max: u64) -> Result<Frame> {
        let mut cursor = bytes;
        Frame::read_from(&mut cursor, max).await
    }

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::try_from(0x0).unwrap(), Opcode::Continuation);
        assert_eq!(Opcode::try_from(0x1).unwrap(), Opcode::Text);
        assert_eq!(Opcode::try_from(0x2).unwrap(), Opcode::Binary);
        assert_eq!(Opcode::try_from(0x8).unwrap(), Opcode::Close);
        assert_eq!(Opcode::try_from(0x9).unwrap(), Opcode::Ping);
        assert_eq!(Opcode::try_from(0xA).unwrap(), Opcode::Pong);
        assert!(matches!(Opcode::try_from(0x3), Err(Error::BadOpcode(0x3))));
        assert!(Opcode::try_from(0xB).is_err());
    }

    #[test]
    fn test_opcode_kinds() {
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
        assert!(Opcode::Text.is_data());
        assert!(Opcode::Binary.is_data());
        assert!(Opcode::Continuation.is_data());
    }

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(1015), CloseCode::TlsHandshake);
        assert_eq!(CloseCode::from(4000), CloseCode::Custom(4000));
        assert_eq!(u16::from(CloseCode::GoingAway), 1001);
        assert_eq!(u16::from(CloseCode::Custom(4000)), 4000);
    }

    #[test]
    fn test_close_code_text() {
        assert_eq!(CloseCode::Normal.text(), "Normal Closure");
        assert_eq!(CloseCode::GoingAway.text(), "Going Away");
        assert_eq!(CloseCode::MessageTooBig.text(), "Message Too Big");
        assert_eq!(CloseCode::Custom(4000).text(), "");
    }

    #[test]
    fn test_apply_mask_is_involution() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let original = b"hello, masked world".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[tokio::test]
    async fn test_roundtrip_unmasked() {
        let frame = Frame::new(Opcode::Text, &b"hello"[..]);
        let decoded = decode(&frame.to_bytes(false), 1 << 20).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_roundtrip_masked_yields_cleartext() {
        let frame = Frame::new(Opcode::Binary, vec![0u8, 1, 2, 3, 254, 255]);
        let wire = frame.to_bytes(true);
        // masked payload on the wire differs from cleartext
        assert_ne!(&wire[wire.len() - 6..], frame.payload.as_ref());
        let decoded = decode(&wire, 1 << 20).await.unwrap();
        assert!(decoded.masked);
        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.opcode, frame.opcode);
        assert_eq!(decoded.fin, frame.fin);
    }

    #[tokio::test]
    async fn test_extended_length_16() {
        let frame = Frame::new(Opcode::Binary, vec![0xAB; 126]);
        let wire = frame.to_bytes(false);
        assert_eq!(wire[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 126);
        let decoded = decode(&wire, 1 << 20).await.unwrap();
        assert_eq!(decoded.payload_len, 126);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[tokio::test]
    async fn test_extended_length_64() {
        let frame = Frame::new(Opcode::Binary, vec![0xCD; 70_000]);
        let wire = frame.to_bytes(false);
        assert_eq!(wire[1] & 0x7F, 127);
        let decoded = decode(&wire, 1 << 20).await.unwrap();
        assert_eq!(decoded.payload_len, 70_000);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[tokio::test]
    async fn test_boundary_length_125_stays_short_form() {
        let frame = Frame::new(Opcode::Binary, vec![0u8; 125]);
        let wire = frame.to_bytes(false);
        assert_eq!(wire[1] & 0x7F, 125);
        assert_eq!(wire.len(), 2 + 125);
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let frame = Frame::new(Opcode::Binary, vec![0u8; 64]);
        let result = decode(&frame.to_bytes(false), 63).await;
        assert!(matches!(
            result,
            Err(Error::FrameTooLarge { len: 64, max: 63 })
        ));
    }

    #[tokio::test]
    async fn test_declared_length_over_cap_aborts_before_payload() {
        // header declares 2^32 bytes; nothing but the header is supplied
        let wire = [0x82u8, 127, 0, 0, 0, 1, 0, 0, 0, 0];
        let result = decode(&wire, 1 << 20).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_deformed_opcode() {
        let wire = [0x83u8, 0x00];
        assert!(matches!(
            decode(&wire, 1 << 20).await,
            Err(Error::BadOpcode(0x3))
        ));
    }

    #[tokio::test]
    async fn test_short_reads_are_deformed() {
        assert!(decode(&[0x81], 1 << 20).await.is_err());
        // declares 5 payload bytes, supplies 2
        assert!(decode(&[0x81, 5, b'h', b'i'], 1 << 20).await.is_err());
        // declares extended length, supplies 1 of 2 bytes
        assert!(decode(&[0x81, 126, 0], 1 << 20).await.is_err());
        // declares mask, supplies half a key
        assert!(decode(&[0x81, 0x80, 1, 2], 1 << 20).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let frame = Frame::new(Opcode::Ping, Bytes::new());
        let wire = frame.to_bytes(false);
        assert_eq!(wire, vec![0x89, 0x00]);
        let decoded = decode(&wire, 1 << 20).await.unwrap();
        assert_eq!(decoded.payload_len, 0);
        assert!(decoded.payload.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_masking_key_per_frame() {
        let frame = Frame::new(Opcode::Text, &b"0123456789abcdef"[..]);
        let a = frame.to_bytes(true);
        let b = frame.to_bytes(true);
        // 4-byte keys collide with probability 2^-32; equality here would
        // mean the generator is not being reseeded
        assert_ne!(a[2..6], b[2..6]);
    }

    #[test]
    fn test_make_close_frame_with_code_text() {
        let frame = make_close_frame(1001, "", true);
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Close);
        assert_eq!(&frame.payload[..2], &1001u16.to_be_bytes());
        assert_eq!(&frame.payload[2..], b"Going Away");
    }

    #[test]
    fn test_make_close_frame_explicit_reason() {
        let frame = make_close_frame(1000, "bye", true);
        assert_eq!(&frame.payload[2..], b"bye");

        let frame = make_close_frame(1000, "", false);
        assert_eq!(frame.payload.len(), 2);
    }

    #[tokio::test]
    async fn test_rsv_bits_roundtrip() {
        let mut frame = Frame::new(Opcode::Text, &b"x"[..]);
        frame.rsv1 = true;
        let decoded = decode(&frame.to_bytes(false), 1 << 20).await.unwrap();
        assert!(decoded.rsv1);
        assert!(!decoded.rsv2);
        assert!(!decoded.rsv3);
    }
}
