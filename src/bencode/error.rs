use thiserror::Error;

/// A bencode decoding failure, located by byte offset into the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("invalid integer at offset {offset}: {reason}")]
    InvalidInteger { offset: usize, reason: &'static str },

    #[error("invalid string length at offset {offset}")]
    InvalidStringLength { offset: usize },

    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { offset: usize, found: char },

    #[error("dictionary key at offset {offset} is not a byte string")]
    NonStringKey { offset: usize },

    #[error("duplicate dictionary key at offset {offset}")]
    DuplicateKey { offset: usize },

    #[error("trailing data after value at offset {offset}")]
    TrailingData { offset: usize },

    #[error("nesting too deep at offset {offset}")]
    NestingTooDeep { offset: usize },
}

impl BencodeError {
    /// The byte offset the error refers to.
    pub fn offset(&self) -> usize {
        match *self {
            BencodeError::UnexpectedEof { offset }
            | BencodeError::InvalidInteger { offset, .. }
            | BencodeError::InvalidStringLength { offset }
            | BencodeError::UnexpectedChar { offset, .. }
            | BencodeError::NonStringKey { offset }
            | BencodeError::DuplicateKey { offset }
            | BencodeError::TrailingData { offset }
            | BencodeError::NestingTooDeep { offset } => offset,
        }
    }
}
