//! Message assembly from incoming frames.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::MutexGuard;
use tracing::debug;

use crate::connection::{maybe_timeout, Conn};
use crate::error::{Error, Result};
use crate::frame::{Frame, Opcode};
use crate::message::Message;
use crate::utf8::is_intact_utf8;

/// Receiving half of a connection.
///
/// Holds the read monitor for the duration of each whole-message read, so
/// concurrent readers serialize and frames are consumed in wire order.
#[derive(Debug, Clone)]
pub struct MessageReceiver {
    conn: Arc<Conn>,
}

impl MessageReceiver {
    /// Bind a receiver to a connection.
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

    /// Read one whole message, reassembling fragments.
    ///
    /// Every frame is size-capped at `max_msg_len`, and the running payload
    /// total of a fragmented message is re-checked against the same cap.
    /// Control frames interleaved within a fragmented message are handled
    /// here: pings are answered (when `auto_pong` is configured), pongs are
    /// skipped, and a close frame is returned to the caller as the next
    /// message, discarding any partial fragments.
    ///
    /// Complete text messages are verified to be well-formed UTF-8.
    pub async fn read_message(&self, max_msg_len: u64) -> Result<Message> {
        let mut reader = self.conn.reader.lock().await;

        let mut opcode: Option<Opcode> = None;
        let mut data = BytesMut::new();
        let mut total: u64 = 0;

        loop {
            if !self.conn.is_open() {
                return Err(Error::NotOpen);
            }

            let frame = self.next_frame(&mut *reader, max_msg_len).await?;

            if frame.opcode.is_control() {
                match frame.opcode {
                    Opcode::Ping => {
                        if self.conn.server().config().protocol.auto_pong {
                            debug!(id = self.conn.id(), "answering ping");
                            let pong = Frame::new(Opcode::Pong, frame.payload);
                            self.conn.write(&pong.to_bytes(false)).await?;
                        }
                    }
                    Opcode::Pong => {
                        debug!(id = self.conn.id(), "pong received");
                    }
                    _ => {
                        // close ends the conversation; partial fragments are moot
                        return Ok(Message {
                            opcode: Opcode::Close,
                            data: frame.payload,
                        });
                    }
                }
                continue;
            }

            match opcode {
                None => {
                    if frame.fin {
                        if frame.opcode == Opcode::Text && !is_intact_utf8(&frame.payload) {
                            return Err(Error::Utf8);
                        }
                        self.conn.server().stats().message_received(frame.payload.len());
                        return Ok(Message {
                            opcode: frame.opcode,
                            data: frame.payload,
                        });
                    }
                    opcode = Some(frame.opcode);
                    total = frame.payload_len;
                    data.extend_from_slice(&frame.payload);
                }
                Some(op) => {
                    if frame.opcode != Opcode::Continuation {
                        return Err(Error::Protocol(
                            "expected continuation frame in fragmented message".to_string(),
                        ));
                    }
                    total += frame.payload_len;
                    if total > max_msg_len {
                        return Err(Error::MessageTooLarge {
                            len: total,
                            max: max_msg_len,
                        });
                    }
                    data.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if op == Opcode::Text && !is_intact_utf8(&data) {
                            return Err(Error::Utf8);
                        }
                        self.conn.server().stats().message_received(data.len());
                        return Ok(Message {
                            opcode: op,
                            data: data.freeze(),
                        });
                    }
                }
            }
        }
    }

    /// Acquire the read monitor for frame-at-a-time reading.
    ///
    /// At most one reader at a time; the monitor is released when the
    /// returned guard drops.
    pub async fn frames(&self) -> FrameReader<'_> {
        FrameReader {
            conn: &self.conn,
            reader: self.conn.reader.lock().await,
        }
    }

    async fn next_frame(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        max_payload_len: u64,
    ) -> Result<Frame> {
        let deadline = self.conn.server().config().timeouts.read;
        let frame = match maybe_timeout(deadline, Frame::read_from(reader, max_payload_len)).await {
            Ok(frame) => frame,
            Err(Error::FrameTooLarge { len, max }) => {
                return Err(Error::MessageTooLarge { len, max })
            }
            Err(e) => return Err(e),
        };

        if self.conn.server().config().protocol.require_masked_frames
            && frame.opcode.is_data()
            && !frame.masked
        {
            return Err(Error::UnmaskedFrame);
        }

        Ok(frame)
    }
}

/// Exclusive-read guard over a connection's incoming frames.
#[derive(Debug)]
pub struct FrameReader<'a> {
    conn: &'a Conn,
    reader: MutexGuard<'a, BufReader<OwnedReadHalf>>,
}

impl FrameReader<'_> {
    /// Decode one frame, size-capped at `max_payload_len`.
    ///
    /// Returns the frame together with its FIN flag.
    pub async fn read_frame(&mut self, max_payload_len: u64) -> Result<(Frame, bool)> {
        if !self.conn.is_open() {
            return Err(Error::NotOpen);
        }
        let deadline = self.conn.server().config().timeouts.read;
        let frame =
            maybe_timeout(deadline, Frame::read_from(&mut *self.reader, max_payload_len)).await?;
        let fin = frame.fin;
        Ok((frame, fin))
    }
}
