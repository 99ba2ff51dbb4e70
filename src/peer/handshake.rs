use bytes::{BufMut, Bytes, BytesMut};

use super::error::PeerError;
use super::peer_id::PeerId;
use crate::constants::{EXTENSION_BIT, HANDSHAKE_LEN, PROTOCOL_STRING};
use crate::metainfo::InfoHash;

/// The fixed 68-byte opening message of every connection.
///
/// ```text
/// [19]["BitTorrent protocol"][reserved: 8][info_hash: 20][peer_id: 20]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    /// Builds our handshake, advertising the extension protocol (BEP-10).
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= EXTENSION_BIT;
        Self {
            reserved,
            info_hash,
            peer_id,
        }
    }

    /// Returns true only if `buf` holds at least a full handshake that
    /// starts with the length byte 19 and the exact protocol string.
    ///
    /// ```
    /// use btwire::peer::Handshake;
    ///
    /// let mut buf = vec![19u8];
    /// buf.extend_from_slice(b"BitTorrent protocol");
    /// buf.resize(68, 0);
    /// assert!(Handshake::recognize(&buf));
    /// assert!(!Handshake::recognize(&buf[..67]));
    ///
    /// buf[0] = 18;
    /// assert!(!Handshake::recognize(&buf));
    /// ```
    pub fn recognize(buf: &[u8]) -> bool {
        buf.len() >= HANDSHAKE_LEN && buf[0] == 19 && &buf[1..20] == PROTOCOL_STRING
    }

    /// Returns true if `buf` could still become a handshake once more bytes
    /// arrive.
    pub(crate) fn could_become(buf: &[u8]) -> bool {
        let Some((&first, rest)) = buf.split_first() else {
            return true;
        };
        let n = rest.len().min(PROTOCOL_STRING.len());
        first == 19 && rest[..n] == PROTOCOL_STRING[..n]
    }

    /// Bit 0x10 of reserved byte 5 (absolute offset 25).
    pub fn supports_extension_protocol(&self) -> bool {
        (self.reserved[5] & EXTENSION_BIT) != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(19);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    /// Parses the first 68 bytes of `data`; trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if !Self::recognize(data) {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let info_hash =
            InfoHash::from_bytes(&data[28..48]).map_err(|_| PeerError::InvalidHandshake)?;
        let peer_id = PeerId::from_bytes(&data[48..68]).ok_or(PeerError::InvalidHandshake)?;

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }
}
