//! HTTP/1.1 opening handshake: bounded read, parse, validation, and the
//! 101 accept response.

use std::sync::Arc;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::connection::Conn;
use crate::error::{Error, Result};
use crate::header::Header;

/// RFC 6455 GUID appended to the client key before hashing.
const ACCEPT_KEY_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn make_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(ACCEPT_KEY_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// A handshake rejection: HTTP status plus reason text for the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReject {
    /// HTTP status code of the failure response.
    pub status: u16,
    /// Reason text written into the response body.
    pub reason: String,
}

impl HandshakeReject {
    /// Build a rejection.
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// Parsed WebSocket upgrade request. Immutable after parse.
#[derive(Debug)]
pub struct HandshakeRequest {
    method: String,
    request_uri: String,
    uri: http::Uri,
    proto: String,
    proto_version: String,
    header: Header,
}

impl HandshakeRequest {
    /// Request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw request URI as supplied on the request line.
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// Parsed request URI.
    pub fn uri(&self) -> &http::Uri {
        &self.uri
    }

    /// Path component of the request URI.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Protocol family, `HTTP` for any well-formed request.
    pub fn proto(&self) -> &str {
        &self.proto
    }

    /// Protocol version, `1.1` required by the default validator.
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Request headers.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Read one handshake request from the stream, bounded by `max_bytes`.
    ///
    /// Reads until the empty-line terminator (`\n\n` or `\r\n\r\n`)
    /// arrives at the tail of the buffer. Fails with "too large handshake"
    /// once the budget is exhausted and "missing last empty line" when the
    /// stream ends first.
    pub async fn read_from<R>(reader: &mut R, max_bytes: usize) -> Result<HandshakeRequest>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(1024.min(max_bytes + 1));

        let crlf = loop {
            if buf.len() > max_bytes {
                return Err(Error::Handshake("too large handshake".to_string()));
            }

            if let Some(crlf) = terminated(&buf) {
                break crlf;
            }

            buf.reserve(1024);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(Error::Handshake("missing last empty line".to_string()));
            }
        };

        // strip the trailing empty line
        let stripped = buf.len() - if crlf { 2 } else { 1 };
        buf.truncate(stripped);

        Self::parse(&buf, crlf)
    }

    fn parse(bytes: &[u8], crlf: bool) -> Result<HandshakeRequest> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Handshake("invalid request line: missing newline".to_string()))?;

        let mut line = &bytes[..newline];
        if crlf {
            line = line.strip_suffix(b"\r").unwrap_or(line);
        }

        let (method, request_uri, proto, proto_version) = parse_request_line(line)?;

        let header = Header::from_bytes(&bytes[newline + 1..], crlf)?;

        let uri: http::Uri = request_uri
            .parse()
            .map_err(|_| Error::Handshake(format!("deformed request uri: {request_uri}")))?;

        Ok(HandshakeRequest {
            method,
            request_uri,
            uri,
            proto,
            proto_version,
            header,
        })
    }
}

/// Detect the terminating empty line at the tail of the buffer.
///
/// Returns `Some(true)` for CRLF line endings, `Some(false)` for bare LF.
fn terminated(buf: &[u8]) -> Option<bool> {
    if buf.len() > 4 && buf.ends_with(b"\r\n\r\n") {
        Some(true)
    } else if buf.len() > 2 && buf.ends_with(b"\n\n") {
        Some(false)
    } else {
        None
    }
}

fn parse_request_line(line: &[u8]) -> Result<(String, String, String, String)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::Handshake("invalid request line: not UTF-8".to_string()))?;

    let (method, rest) = line
        .split_once(' ')
        .ok_or_else(|| Error::Handshake("invalid request line: deformed parts".to_string()))?;
    let (request_uri, proto_full) = rest
        .split_once(' ')
        .ok_or_else(|| Error::Handshake("invalid request line: deformed parts".to_string()))?;
    let (proto, proto_version) = proto_full
        .split_once('/')
        .ok_or_else(|| Error::Handshake("invalid request line: deformed proto".to_string()))?;

    Ok((
        method.to_string(),
        request_uri.to_string(),
        proto.to_string(),
        proto_version.to_string(),
    ))
}

/// The built-in server-side handshake check.
///
/// `has_handler` reports whether an open handler is registered for the
/// request path; without one the request is rejected 404.
pub fn default_check(
    request: &HandshakeRequest,
    has_handler: bool,
) -> std::result::Result<(), HandshakeReject> {
    let header = request.header();

    if request.proto_version() != "1.1" {
        return Err(HandshakeReject::new(400, "invalid http proto version"));
    }

    if !header.has_key("Host") {
        return Err(HandshakeReject::new(400, "missing header 'Host'"));
    }

    // Firefox sends "keep-alive, Upgrade", hence the substring match
    if !header.has_key_val_contains("Connection", "Upgrade") {
        return Err(HandshakeReject::new(
            400,
            "missing or invalid header 'Connection'",
        ));
    }

    if !header.has_key_val_eq("Upgrade", "websocket") {
        return Err(HandshakeReject::new(
            400,
            "missing or invalid header 'Upgrade'",
        ));
    }

    if !header.has_key_val_eq("Sec-WebSocket-Version", "13") {
        return Err(HandshakeReject::new(
            400,
            "missing or invalid header 'Sec-WebSocket-Version'",
        ));
    }

    if !header.has_key("Sec-WebSocket-Key") {
        return Err(HandshakeReject::new(
            400,
            "missing header 'Sec-WebSocket-Key'",
        ));
    }

    if !has_handler {
        return Err(HandshakeReject::new(
            404,
            format!("service not found for: {}", request.path()),
        ));
    }

    Ok(())
}

/// Write the 101 Switching Protocols response with the computed accept key.
pub async fn accept(
    request: &HandshakeRequest,
    conn: &Arc<Conn>,
) -> std::result::Result<(), HandshakeReject> {
    let client_key = request
        .header()
        .get_one("Sec-WebSocket-Key")
        .ok_or_else(|| HandshakeReject::new(400, "missing header 'Sec-WebSocket-Key'"))?;
    let accept_key = make_accept_key(client_key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         \r\n"
    );

    conn.write(response.as_bytes())
        .await
        .map_err(|_| HandshakeReject::new(500, "failed to write handshake response"))?;
    Ok(())
}

/// Default handshake handler: validate, then write the 101 response.
pub async fn default_handshake(
    request: &HandshakeRequest,
    conn: &Arc<Conn>,
) -> std::result::Result<(), HandshakeReject> {
    let has_handler = conn.server().open_router().has_handler(request.path());
    default_check(request, has_handler)?;
    accept(request, conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Result<HandshakeRequest> {
        let mut cursor = bytes;
        HandshakeRequest::read_from(&mut cursor, 1 << 20).await
    }

    fn sample_request() -> Vec<u8> {
        b"GET /chat HTTP/1.1\r\n\
          Host: server.example.com\r\n\
          Upgrade: websocket\r\n\
          Connection: Upgrade\r\n\
          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
          Sec-WebSocket-Version: 13\r\n\
          \r\n"
            .to_vec()
    }

    #[test]
    fn test_make_accept_key() {
        // RFC 6455 sample nonce
        assert_eq!(
            make_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(make_accept_key("M/A="), "5oBJ6efz0YUYE2VFXcCfYKTBqYY=");
    }

    #[tokio::test]
    async fn test_parse_crlf_request() {
        let request = parse(&sample_request()).await.unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.request_uri(), "/chat");
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.proto(), "HTTP");
        assert_eq!(request.proto_version(), "1.1");
        assert_eq!(request.header().get_one("Host"), Some("server.example.com"));
        assert_eq!(
            request.header().get_one("Sec-WebSocket-Key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }

    #[tokio::test]
    async fn test_parse_lf_request() {
        let bytes = b"GET / HTTP/1.1\nHost: h\n\n";
        let request = parse(bytes).await.unwrap();
        assert_eq!(request.path(), "/");
        assert_eq!(request.header().get_one("Host"), Some("h"));
    }

    #[tokio::test]
    async fn test_path_excludes_query() {
        let bytes = b"GET /chat?room=42 HTTP/1.1\r\nHost: h\r\n\r\n";
        let request = parse(bytes).await.unwrap();
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.request_uri(), "/chat?room=42");
    }

    #[tokio::test]
    async fn test_missing_last_empty_line() {
        let bytes = b"GET / HTTP/1.1\r\nHost: h\r\n";
        let err = parse(bytes).await.unwrap_err();
        assert!(err.to_string().contains("missing last empty line"));
    }

    #[tokio::test]
    async fn test_too_large_handshake() {
        let mut bytes = b"GET / HTTP/1.1\r\n".to_vec();
        bytes.extend_from_slice(&vec![b'a'; 64]);
        let mut cursor = bytes.as_slice();
        let err = HandshakeRequest::read_from(&mut cursor, 32).await.unwrap_err();
        assert!(err.to_string().contains("too large handshake"));
    }

    #[tokio::test]
    async fn test_deformed_request_line() {
        let err = parse(b"GET\r\n\r\n").await.unwrap_err();
        assert!(err.to_string().contains("deformed parts"));

        let err = parse(b"GET / HTTP\r\n\r\n").await.unwrap_err();
        assert!(err.to_string().contains("deformed proto"));
    }

    #[tokio::test]
    async fn test_default_check_accepts() {
        let request = parse(&sample_request()).await.unwrap();
        assert!(default_check(&request, true).is_ok());
    }

    #[tokio::test]
    async fn test_default_check_firefox_connection_header() {
        let bytes = b"GET / HTTP/1.1\r\n\
            Host: h\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive, Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        let request = parse(bytes).await.unwrap();
        assert!(default_check(&request, true).is_ok());
    }

    #[tokio::test]
    async fn test_default_check_missing_version() {
        let bytes = b"GET / HTTP/1.1\r\n\
            Host: h\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let request = parse(bytes).await.unwrap();
        let reject = default_check(&request, true).unwrap_err();
        assert_eq!(reject.status, 400);
        assert!(reject.reason.contains("Sec-WebSocket-Version"));
    }

    #[tokio::test]
    async fn test_default_check_wrong_proto_version() {
        let bytes = b"GET / HTTP/1.0\r\nHost: h\r\n\r\n";
        let request = parse(bytes).await.unwrap();
        let reject = default_check(&request, true).unwrap_err();
        assert_eq!(reject.status, 400);
        assert!(reject.reason.contains("proto version"));
    }

    #[tokio::test]
    async fn test_default_check_unknown_path() {
        let request = parse(&sample_request()).await.unwrap();
        let reject = default_check(&request, false).unwrap_err();
        assert_eq!(reject.status, 404);
        assert!(reject.reason.contains("/chat"));
    }
}
