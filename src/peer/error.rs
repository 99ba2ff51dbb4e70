use std::fmt;

use thiserror::Error;

use crate::bencode::BencodeError;
use crate::metainfo::MetainfoError;

/// The wait that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Handshake,
    Unchoke,
    Piece,
    Metadata,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::Handshake => "handshake",
            Phase::Unchoke => "unchoke",
            Phase::Piece => "piece",
            Phase::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// Broad failure classes, each with its own recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed bencode, handshake or frame.
    Decode,
    /// The peer (or the caller) broke the protocol's ordering rules.
    ProtocolViolation,
    /// Data did not match its SHA-1. Re-request; never accept.
    Verification,
    /// A deadline expired. Retry or move to another peer.
    Timeout,
    /// The connection failed or was closed.
    Transport,
}

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The first bytes on the stream were not a BitTorrent handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A length prefix exceeded the configured maximum.
    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// Error decoding bencode in extension messages.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// Recovered metadata did not form a valid info dictionary.
    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    /// An operation was attempted in the wrong session state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer declared (via BITFIELD/HAVE) that it lacks this piece.
    #[error("peer does not have piece {piece}")]
    PieceUnavailable { piece: u32 },

    /// The peer does not speak ut_metadata.
    #[error("peer does not support metadata exchange")]
    MetadataUnsupported,

    /// The peer refused to send a metadata piece.
    #[error("peer rejected metadata piece {piece}")]
    MetadataRejected { piece: u32 },

    /// The peer advertised metadata larger than we accept.
    #[error("metadata size {0} is out of range")]
    MetadataSize(u64),

    /// Reassembled metadata does not hash to the requested info hash.
    #[error("metadata does not match info hash")]
    MetadataHashMismatch,

    /// A completed piece failed SHA-1 verification.
    #[error("piece {piece} failed hash verification")]
    VerificationFailed { piece: u32 },

    /// Operation timed out.
    #[error("timed out waiting for {0}")]
    Timeout(Phase),
}

impl PeerError {
    /// Classifies the error by the recovery it calls for.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PeerError::Io(_) | PeerError::ConnectionClosed => ErrorKind::Transport,
            PeerError::InvalidHandshake
            | PeerError::InvalidMessage(_)
            | PeerError::MessageTooLarge { .. }
            | PeerError::Bencode(_)
            | PeerError::Metainfo(_) => ErrorKind::Decode,
            PeerError::InfoHashMismatch
            | PeerError::ProtocolViolation(_)
            | PeerError::PieceUnavailable { .. }
            | PeerError::MetadataUnsupported
            | PeerError::MetadataRejected { .. }
            | PeerError::MetadataSize(_) => ErrorKind::ProtocolViolation,
            PeerError::MetadataHashMismatch | PeerError::VerificationFailed { .. } => {
                ErrorKind::Verification
            }
            PeerError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}
