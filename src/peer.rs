//! Peer wire protocol (BEP-3, BEP-9, BEP-10)
//!
//! Everything needed to talk to one remote peer: the handshake, the
//! length-prefixed message framing, the ut_metadata exchange and the
//! block pipeline that turns a piece index into verified bytes.
//!
//! The building blocks are sans-IO. [`MessageFramer`], [`BlockScheduler`],
//! [`PieceAssembler`] and [`MetadataExchange`] only consume and produce
//! bytes and messages; [`PeerSession`] drives them over a stream.

mod assembler;
mod bitfield;
mod error;
mod extension;
mod framer;
mod handshake;
mod message;
mod metadata;
mod peer_id;
mod piece;
mod scheduler;
mod session;

pub use assembler::{verify_piece, BlockOutcome, PieceAssembler};
pub use bitfield::Bitfield;
pub use error::{ErrorKind, PeerError, Phase};
pub use extension::{ExtensionHandshake, UT_METADATA};
pub use framer::{Frame, Frames, MessageFramer};
pub use handshake::Handshake;
pub use message::{Message, MessageId, REQUEST_FRAME_LEN};
pub use metadata::{
    metadata_piece_count, metadata_piece_size, MetadataExchange, MetadataMessage,
    MetadataMessageType, MetadataPhase, MetadataStep,
};
pub use peer_id::PeerId;
pub use piece::{block_count, block_length, Block, BlockRequest};
pub use scheduler::{BlockScheduler, RequestPipeline};
pub use session::{ConnectionState, PeerSession, SessionState};

#[cfg(test)]
mod tests;
