//! Message emission: whole messages, frame streaming, and close frames.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::MutexGuard;
use tracing::info;

use crate::connection::{maybe_timeout, Conn, ConnState};
use crate::error::{Error, Result};
use crate::frame::{make_close_frame, Frame, Opcode};
use crate::message::Message;

/// Sending half of a connection.
///
/// Holds the write monitor for the duration of each whole-message send, so
/// concurrent senders serialize and their frames never interleave on the
/// wire. The monitor is independent of the receiver's, letting send and
/// receive proceed in parallel.
#[derive(Debug, Clone)]
pub struct MessageSender {
    conn: Arc<Conn>,
}

impl MessageSender {
    /// Bind a sender to a connection.
    pub fn new(conn: Arc<Conn>) -> Self {
        Self { conn }
    }

    /// The underlying connection.
    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Send `msg` as a single frame with FIN set.
    ///
    /// Returns the number of wire bytes written. Set `mask` to emit a
    /// masked frame (client behavior; a server normally sends unmasked).
    pub async fn send_message(&self, msg: &Message, mask: bool) -> Result<usize> {
        let mut writer = self.conn.writer.lock().await;
        if !self.conn.is_open() {
            return Err(Error::NotOpen);
        }

        let frame = Frame::new(msg.opcode, msg.data.clone());
        let n = self.write_frame(&mut writer, &frame, mask).await?;
        self.conn.server().stats().message_sent(msg.data.len());
        Ok(n)
    }

    /// Send `text` as a single text frame.
    pub async fn send_text(&self, text: impl Into<bytes::Bytes>, mask: bool) -> Result<usize> {
        self.send_message(&Message::text(text.into()), mask).await
    }

    /// Send `data` as a single binary frame.
    pub async fn send_binary(&self, data: impl Into<bytes::Bytes>, mask: bool) -> Result<usize> {
        self.send_message(&Message::binary(data.into()), mask).await
    }

    /// Drain `reader` to memory and send it as one frame of `opcode`.
    pub async fn send_message_from_reader<R>(
        &self,
        reader: &mut R,
        opcode: Opcode,
        mask: bool,
    ) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer = self.conn.writer.lock().await;
        if !self.conn.is_open() {
            return Err(Error::NotOpen);
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        let len = data.len();
        let frame = Frame::new(opcode, data);
        let n = self.write_frame(&mut writer, &frame, mask).await?;
        self.conn.server().stats().message_sent(len);
        Ok(n)
    }

    /// Acquire the write monitor for frame-at-a-time sending.
    ///
    /// At most one writer at a time; the monitor is released when the
    /// returned guard drops.
    pub async fn frames(&self) -> FrameWriter<'_> {
        FrameWriter {
            conn: &self.conn,
            writer: self.conn.writer.lock().await,
        }
    }

    /// Send a close frame and tear the connection down.
    ///
    /// The state moves to `Closed` before the final write; a write failure
    /// is swallowed since the peer may already be gone.
    pub async fn send_close(&self, code: u16, reason: &str, use_code_text: bool, mask: bool) {
        self.conn.set_state(ConnState::Closed);

        let frame = make_close_frame(code, reason, use_code_text);
        {
            let mut writer = self.conn.writer.lock().await;
            let _ = writer.write_all(&frame.to_bytes(mask)).await;
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
        self.conn.detach();

        info!(id = self.conn.id(), code, "close frame sent");
    }

    async fn write_frame(
        &self,
        writer: &mut MutexGuard<'_, BufWriter<OwnedWriteHalf>>,
        frame: &Frame,
        mask: bool,
    ) -> Result<usize> {
        let bytes = frame.to_bytes(mask);
        let deadline = self.conn.server().config().timeouts.write;
        maybe_timeout(deadline, async {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            Ok(bytes.len())
        })
        .await
    }
}

/// Exclusive-write guard over a connection's outgoing frames.
///
/// Frames written within one guard form a single fragmented message; the
/// guard keeps other senders out until it drops.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    conn: &'a Conn,
    writer: MutexGuard<'a, BufWriter<OwnedWriteHalf>>,
}

impl FrameWriter<'_> {
    /// Write one frame.
    ///
    /// The frame carries `opcode` when `begin` is set and `Continuation`
    /// otherwise; FIN mirrors `end`.
    pub async fn send_frame(
        &mut self,
        data: &[u8],
        opcode: Opcode,
        begin: bool,
        end: bool,
        mask: bool,
    ) -> Result<usize> {
        if !self.conn.is_open() {
            return Err(Error::NotOpen);
        }

        let mut frame = Frame::new(
            if begin { opcode } else { Opcode::Continuation },
            data.to_vec(),
        );
        frame.fin = end;

        let bytes = frame.to_bytes(mask);
        let deadline = self.conn.server().config().timeouts.write;
        maybe_timeout(deadline, async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await?;
            Ok(())
        })
        .await?;

        self.conn.server().stats().bytes_sent(data.len());
        Ok(bytes.len())
    }

    /// Stream `reader` as a fragmented message in `per_frame_size` chunks.
    ///
    /// A one-byte look-ahead after each chunk detects end-of-stream so FIN
    /// is set on the final frame. Empty input sends nothing.
    pub async fn send_frames_from_reader<R>(
        &mut self,
        reader: &mut R,
        opcode: Opcode,
        per_frame_size: usize,
        mask: bool,
    ) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut chunk = vec![0u8; per_frame_size];
        let mut sent = 0;
        let mut begin = true;

        loop {
            let n = read_full(reader, &mut chunk).await?;
            if n == 0 {
                return Ok(sent);
            }

            // peek past the chunk to learn whether this is the last frame
            let end = reader.fill_buf().await?.is_empty();
            sent += self.send_frame(&chunk[..n], opcode, begin, end, mask).await?;
            begin = false;

            if end {
                return Ok(sent);
            }
        }
    }
}

/// Read until `buf` is full or the stream ends; returns the filled count.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_full_exact() {
        let mut src: &[u8] = b"0123456789";
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"4567");
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 0);
    }
}
