//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! Used for magnet links: the info dictionary is fetched from a peer in
//! 16 KiB pieces, reassembled, and checked against the info hash before it
//! is trusted.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace};

use super::error::PeerError;
use super::extension::{ExtensionHandshake, UT_METADATA};
use super::message::Message;
use crate::bencode::{decode_prefix, encode, Value};
use crate::constants::{
    EXTENSION_HANDSHAKE_ID, MAX_METADATA_SIZE, METADATA_PIECE_SIZE, UT_METADATA_ID,
};
use crate::metainfo::{sha1_digest, InfoHash, TorrentInfo};

/// Message types for the ut_metadata extension (BEP-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_integer(v: i64) -> Option<Self> {
        match v {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// A ut_metadata message: a bencoded dictionary, followed by the raw piece
/// bytes for data messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Only present in data messages.
    pub total_size: Option<u32>,
    /// Only present in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: u32, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"msg_type"),
            Value::Integer(self.msg_type as i64),
        );
        dict.insert(
            Bytes::from_static(b"piece"),
            Value::Integer(i64::from(self.piece)),
        );
        if let Some(total_size) = self.total_size {
            dict.insert(
                Bytes::from_static(b"total_size"),
                Value::Integer(i64::from(total_size)),
            );
        }

        let mut out = encode(&Value::Dict(dict));
        if let Some(ref data) = self.data {
            out.extend_from_slice(data);
        }
        Bytes::from(out)
    }

    /// Decodes a message. The dictionary's end is found by decoding it; the
    /// bytes after it are taken as piece data without being parsed.
    pub fn decode(payload: &Bytes) -> Result<Self, PeerError> {
        let (value, dict_end) = decode_prefix(payload)?;

        let field = |key: &'static str| {
            value
                .get_integer(key.as_bytes())
                .ok_or_else(|| PeerError::InvalidMessage(format!("ut_metadata: missing {key}")))
        };

        let msg_type = MetadataMessageType::from_integer(field("msg_type")?)
            .ok_or_else(|| PeerError::InvalidMessage("ut_metadata: unknown msg_type".into()))?;

        let piece = u32::try_from(field("piece")?)
            .map_err(|_| PeerError::InvalidMessage("ut_metadata: bad piece index".into()))?;

        let total_size = match value.get_integer(b"total_size") {
            Some(size) => Some(
                u32::try_from(size).map_err(|_| PeerError::MetadataSize(size.unsigned_abs()))?,
            ),
            None => None,
        };

        let data = (msg_type == MetadataMessageType::Data).then(|| payload.slice(dict_end..));

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Number of metadata pieces for a given metadata size.
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Size of a specific metadata piece; 0 past the end.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetadataPhase {
    Start,
    ExtensionHandshakeSent,
    PeerExtensionIdKnown,
    MetadataRequested,
    MetadataComplete,
}

/// What the session should do after feeding the exchange a message.
#[derive(Debug)]
pub enum MetadataStep {
    /// Nothing to send yet; keep reading.
    Wait,
    /// Write these messages to the peer.
    Send(Vec<Message>),
    /// The info dictionary is recovered and verified.
    Complete(TorrentInfo),
}

/// Sans-IO ut_metadata state machine for one peer.
///
/// The session writes [`handshake_message`](Self::handshake_message), then
/// feeds every EXTENDED message it receives to [`on_extended`](Self::on_extended)
/// and writes whatever comes back until the exchange completes.
#[derive(Debug)]
pub struct MetadataExchange {
    info_hash: InfoHash,
    local_id: u8,
    peer_id: Option<u8>,
    total_size: Option<u32>,
    pieces: BTreeMap<u32, Bytes>,
    phase: MetadataPhase,
}

impl MetadataExchange {
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            local_id: UT_METADATA_ID,
            peer_id: None,
            total_size: None,
            pieces: BTreeMap::new(),
            phase: MetadataPhase::Start,
        }
    }

    pub fn phase(&self) -> MetadataPhase {
        self.phase
    }

    /// The id the peer assigned to ut_metadata; used when sending requests.
    pub fn peer_extension_id(&self) -> Option<u8> {
        self.peer_id
    }

    pub fn total_size(&self) -> Option<u32> {
        self.total_size
    }

    /// Our extension handshake, advertising ut_metadata under our local id.
    pub fn handshake_message(&mut self) -> Message {
        self.phase = MetadataPhase::ExtensionHandshakeSent;
        ExtensionHandshake::with_extensions(&[(UT_METADATA, self.local_id)]).to_message()
    }

    pub fn on_extended(&mut self, id: u8, payload: &Bytes) -> Result<MetadataStep, PeerError> {
        if id == EXTENSION_HANDSHAKE_ID {
            let hs = ExtensionHandshake::decode(payload)?;
            return self.on_peer_handshake(&hs);
        }
        if id == self.local_id {
            let msg = MetadataMessage::decode(payload)?;
            return self.on_metadata_message(msg);
        }
        debug!("ignoring extended message with id {}", id);
        Ok(MetadataStep::Wait)
    }

    fn on_peer_handshake(&mut self, hs: &ExtensionHandshake) -> Result<MetadataStep, PeerError> {
        let peer_id = hs
            .get_extension_id(UT_METADATA)
            .ok_or(PeerError::MetadataUnsupported)?;
        self.peer_id = Some(peer_id);
        self.phase = MetadataPhase::PeerExtensionIdKnown;

        if let Some(size) = hs.metadata_size {
            self.set_total_size(size)?;
        }
        debug!(
            "peer serves ut_metadata as id {} (size {:?})",
            peer_id, self.total_size
        );

        let requests = match self.total_size {
            Some(size) => (0..metadata_piece_count(size as usize) as u32)
                .map(|piece| self.request(piece, peer_id))
                .collect(),
            None => vec![self.request(0, peer_id)],
        };
        self.phase = MetadataPhase::MetadataRequested;
        Ok(MetadataStep::Send(requests))
    }

    fn on_metadata_message(&mut self, msg: MetadataMessage) -> Result<MetadataStep, PeerError> {
        match msg.msg_type {
            MetadataMessageType::Request => {
                debug!("ignoring metadata request for piece {}", msg.piece);
                Ok(MetadataStep::Wait)
            }
            MetadataMessageType::Reject => Err(PeerError::MetadataRejected { piece: msg.piece }),
            MetadataMessageType::Data => self.on_data(msg),
        }
    }

    fn on_data(&mut self, msg: MetadataMessage) -> Result<MetadataStep, PeerError> {
        let peer_id = self
            .peer_id
            .ok_or_else(|| PeerError::ProtocolViolation("metadata before extension handshake".into()))?;

        let learned_size = self.total_size.is_none();
        match (self.total_size, msg.total_size) {
            (None, Some(size)) => self.set_total_size(i64::from(size))?,
            (Some(known), Some(size)) if known != size => {
                return Err(PeerError::InvalidMessage(format!(
                    "ut_metadata: total_size changed from {known} to {size}"
                )))
            }
            (None, None) => {
                return Err(PeerError::InvalidMessage(
                    "ut_metadata: data without total_size".into(),
                ))
            }
            _ => {}
        }
        let total = self.total_size.unwrap_or_default() as usize;

        let expected = metadata_piece_size(msg.piece, total);
        let data = msg.data.unwrap_or_default();
        if expected == 0 || data.len() != expected {
            return Err(PeerError::InvalidMessage(format!(
                "ut_metadata: piece {} carries {} bytes, expected {}",
                msg.piece,
                data.len(),
                expected
            )));
        }

        trace!("metadata piece {} ({} bytes)", msg.piece, data.len());
        self.pieces.insert(msg.piece, data);

        let count = metadata_piece_count(total);
        if self.pieces.len() == count {
            return self.finish(total).map(MetadataStep::Complete);
        }

        if learned_size {
            let rest = (0..count as u32)
                .filter(|piece| !self.pieces.contains_key(piece))
                .map(|piece| self.request(piece, peer_id))
                .collect();
            return Ok(MetadataStep::Send(rest));
        }

        Ok(MetadataStep::Wait)
    }

    fn finish(&mut self, total: usize) -> Result<TorrentInfo, PeerError> {
        let mut raw = BytesMut::with_capacity(total);
        for data in self.pieces.values() {
            raw.extend_from_slice(data);
        }
        let raw = raw.freeze();

        if sha1_digest(&raw) != *self.info_hash.as_bytes() {
            self.pieces.clear();
            return Err(PeerError::MetadataHashMismatch);
        }

        let info = TorrentInfo::from_info_bytes(raw)?;
        self.pieces.clear();
        self.phase = MetadataPhase::MetadataComplete;
        info!(
            "recovered metadata for {} ({} pieces)",
            info.name,
            info.piece_count()
        );
        Ok(info)
    }

    fn set_total_size(&mut self, size: i64) -> Result<(), PeerError> {
        let size = u32::try_from(size)
            .ok()
            .filter(|&s| s > 0 && s as usize <= MAX_METADATA_SIZE)
            .ok_or(PeerError::MetadataSize(size.unsigned_abs()))?;
        self.total_size = Some(size);
        Ok(())
    }

    fn request(&self, piece: u32, peer_id: u8) -> Message {
        Message::Extended {
            id: peer_id,
            payload: MetadataMessage::request(piece).encode(),
        }
    }
}
