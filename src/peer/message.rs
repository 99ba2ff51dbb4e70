use super::error::PeerError;
use super::piece::{Block, BlockRequest};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length of an encoded REQUEST or CANCEL frame, prefix included.
pub const REQUEST_FRAME_LEN: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    // Extension protocol (BEP-10)
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            20 => Ok(MessageId::Extended),
            other => Err(other),
        }
    }
}

/// A peer wire message.
///
/// Ids outside the table decode to [`Message::Unknown`] so that newer
/// extensions never abort a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request(BlockRequest),
    Piece(Block),
    Cancel(BlockRequest),
    Extended { id: u8, payload: Bytes },
    Unknown { id: u8, payload: Bytes },
}

impl Message {
    /// Short name for logs; never includes payload bytes.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have { .. } => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request(_) => "request",
            Message::Piece(_) => "piece",
            Message::Cancel(_) => "cancel",
            Message::Extended { .. } => "extended",
            Message::Unknown { .. } => "unknown",
        }
    }

    /// Encodes the message with its 4-byte big-endian length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => put_bare(buf, MessageId::Choke),
            Message::Unchoke => put_bare(buf, MessageId::Unchoke),
            Message::Interested => put_bare(buf, MessageId::Interested),
            Message::NotInterested => put_bare(buf, MessageId::NotInterested),
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request(req) => put_request(buf, MessageId::Request, req),
            Message::Cancel(req) => put_request(buf, MessageId::Cancel, req),
            Message::Piece(block) => {
                buf.put_u32(9 + block.data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(block.piece);
                buf.put_u32(block.offset);
                buf.put_slice(&block.data);
            }
            Message::Extended { id, payload } => {
                buf.put_u32(2 + payload.len() as u32);
                buf.put_u8(MessageId::Extended as u8);
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
            Message::Unknown { id, payload } => {
                buf.put_u32(1 + payload.len() as u32);
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }
    }

    /// Decodes one frame body: the bytes after the length prefix.
    ///
    /// An empty body is a keep-alive.
    pub fn decode(mut body: Bytes) -> Result<Self, PeerError> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let raw_id = body.get_u8();
        let id = match MessageId::try_from(raw_id) {
            Ok(id) => id,
            Err(id) => return Ok(Message::Unknown { id, payload: body }),
        };

        match id {
            MessageId::Choke => expect_empty(body, "choke").map(|_| Message::Choke),
            MessageId::Unchoke => expect_empty(body, "unchoke").map(|_| Message::Unchoke),
            MessageId::Interested => {
                expect_empty(body, "interested").map(|_| Message::Interested)
            }
            MessageId::NotInterested => {
                expect_empty(body, "not interested").map(|_| Message::NotInterested)
            }
            MessageId::Have => {
                if body.remaining() != 4 {
                    return Err(PeerError::InvalidMessage("have must carry 4 bytes".into()));
                }
                Ok(Message::Have {
                    piece: body.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(body)),
            MessageId::Request => decode_request(body, "request").map(Message::Request),
            MessageId::Cancel => decode_request(body, "cancel").map(Message::Cancel),
            MessageId::Piece => {
                if body.remaining() < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let piece = body.get_u32();
                let offset = body.get_u32();
                Ok(Message::Piece(Block::new(piece, offset, body)))
            }
            MessageId::Extended => {
                if body.remaining() < 1 {
                    return Err(PeerError::InvalidMessage("extended too short".into()));
                }
                let ext_id = body.get_u8();
                Ok(Message::Extended {
                    id: ext_id,
                    payload: body,
                })
            }
        }
    }
}

fn put_bare(buf: &mut BytesMut, id: MessageId) {
    buf.put_u32(1);
    buf.put_u8(id as u8);
}

fn put_request(buf: &mut BytesMut, id: MessageId, req: &BlockRequest) {
    buf.put_u32(13);
    buf.put_u8(id as u8);
    buf.put_u32(req.piece);
    buf.put_u32(req.offset);
    buf.put_u32(req.length);
}

fn expect_empty(body: Bytes, name: &str) -> Result<(), PeerError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(PeerError::InvalidMessage(format!("{name} carries a payload")))
    }
}

fn decode_request(mut body: Bytes, name: &str) -> Result<BlockRequest, PeerError> {
    if body.remaining() != 12 {
        return Err(PeerError::InvalidMessage(format!(
            "{name} must carry 12 bytes"
        )));
    }
    Ok(BlockRequest::new(
        body.get_u32(),
        body.get_u32(),
        body.get_u32(),
    ))
}
