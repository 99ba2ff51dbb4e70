use bytes::{Buf, BytesMut};
use tracing::trace;

use super::error::PeerError;
use super::handshake::Handshake;
use super::message::Message;
use crate::constants::{HANDSHAKE_LEN, MAX_MESSAGE_SIZE};

/// One unit recovered from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    Message(Message),
}

/// Rebuilds message boundaries from arbitrarily split stream deliveries.
///
/// Bytes are appended as they arrive and [`next_frame`](Self::next_frame)
/// hands out complete frames until it needs more input. A framer created
/// with [`new`](Self::new) expects the 68-byte handshake first and only
/// switches to length-prefixed framing once it has seen one. Keep-alives
/// are consumed without being reported.
///
/// ```
/// use btwire::peer::{Frame, Message, MessageFramer};
///
/// let mut framer = MessageFramer::without_handshake();
/// let bytes = Message::Have { piece: 7 }.encode();
///
/// framer.extend(&bytes[..3]);
/// assert_eq!(framer.next_frame().unwrap(), None);
///
/// framer.extend(&bytes[3..]);
/// assert_eq!(
///     framer.next_frame().unwrap(),
///     Some(Frame::Message(Message::Have { piece: 7 }))
/// );
/// ```
#[derive(Debug)]
pub struct MessageFramer {
    buf: BytesMut,
    awaiting_handshake: bool,
    max_len: usize,
}

impl MessageFramer {
    /// A framer for a fresh connection: the handshake comes first.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(32 * 1024),
            awaiting_handshake: true,
            max_len: MAX_MESSAGE_SIZE,
        }
    }

    /// A framer that starts directly with length-prefixed messages.
    pub fn without_handshake() -> Self {
        Self {
            awaiting_handshake: false,
            ..Self::new()
        }
    }

    /// Rejects frames whose length prefix exceeds `max_len`.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The accumulator itself, for reading straight from a stream.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_awaiting_handshake(&self) -> bool {
        self.awaiting_handshake
    }

    /// Returns the next complete frame, or `Ok(None)` if more input is needed.
    ///
    /// # Errors
    ///
    /// Fails if the stream does not open with an exact handshake, if a
    /// length prefix exceeds the limit, or if a message body is malformed.
    /// The framer should be discarded after an error.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PeerError> {
        if self.awaiting_handshake {
            if !Handshake::could_become(&self.buf) {
                return Err(PeerError::InvalidHandshake);
            }
            if self.buf.len() < HANDSHAKE_LEN {
                return Ok(None);
            }
            let raw = self.buf.split_to(HANDSHAKE_LEN);
            let handshake = Handshake::decode(&raw)?;
            self.awaiting_handshake = false;
            return Ok(Some(Frame::Handshake(handshake)));
        }

        loop {
            if self.buf.len() < 4 {
                return Ok(None);
            }

            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;

            if len > self.max_len {
                return Err(PeerError::MessageTooLarge {
                    len,
                    max: self.max_len,
                });
            }

            if len == 0 {
                self.buf.advance(4);
                trace!("keep-alive");
                continue;
            }

            if self.buf.len() < 4 + len {
                return Ok(None);
            }

            self.buf.advance(4);
            let body = self.buf.split_to(len).freeze();
            return Message::decode(body).map(|m| Some(Frame::Message(m)));
        }
    }

    /// Drains every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`MessageFramer::frames`].
///
/// Ends when more input is needed, or after yielding an error.
pub struct Frames<'a> {
    framer: &'a mut MessageFramer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, PeerError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.framer.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.framer.buf.clear();
                Some(Err(e))
            }
        }
    }
}
