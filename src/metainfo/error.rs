use thiserror::Error;

use crate::bencode::BencodeError;

/// Errors that can occur when parsing torrent files, info dictionaries or
/// magnet links.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The input contains invalid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field has an invalid value or type.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The number of piece hashes does not cover the content length.
    #[error("expected {expected} piece hashes, found {actual}")]
    PieceCountMismatch { expected: u64, actual: usize },

    /// An info hash was not 20 bytes or not valid hex/base32.
    #[error("invalid info hash")]
    InvalidInfoHash,

    /// The magnet link is malformed.
    #[error("invalid magnet link: {0}")]
    InvalidMagnetLink(String),
}
