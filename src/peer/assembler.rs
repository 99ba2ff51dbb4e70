use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::error::PeerError;
use super::piece::{block_count, block_length, Block};
use crate::constants::BLOCK_SIZE;
use crate::metainfo::sha1_digest;

/// Result of handing a block to the [`PieceAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Stored; the piece still misses blocks.
    Pending,
    /// The last block arrived and the piece verified.
    Complete(Bytes),
    /// This offset was already stored; the copy was dropped.
    Duplicate,
    /// No piece with this index is expected.
    Unsolicited,
    /// Offset or length does not fit the piece's block layout.
    Discarded,
}

#[derive(Debug)]
struct PieceInProgress {
    length: u32,
    hash: [u8; 20],
    blocks: BTreeMap<u32, Bytes>,
}

/// Collects blocks per piece and verifies each piece as it completes.
///
/// Blocks may arrive in any order; they are joined by offset once every
/// block of the piece is present, and the result is only released if its
/// SHA-1 matches.
#[derive(Debug, Default)]
pub struct PieceAssembler {
    pieces: BTreeMap<u32, PieceInProgress>,
}

impl PieceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a piece of `length` bytes that must hash to `hash`.
    /// Re-registering a piece drops anything already collected for it.
    pub fn expect(&mut self, piece: u32, length: u32, hash: [u8; 20]) {
        self.pieces.insert(
            piece,
            PieceInProgress {
                length,
                hash,
                blocks: BTreeMap::new(),
            },
        );
    }

    pub fn is_expected(&self, piece: u32) -> bool {
        self.pieces.contains_key(&piece)
    }

    /// Stops collecting `piece` and frees its blocks.
    pub fn forget(&mut self, piece: u32) {
        self.pieces.remove(&piece);
    }

    /// Number of blocks held for `piece`.
    pub fn received(&self, piece: u32) -> usize {
        self.pieces.get(&piece).map_or(0, |p| p.blocks.len())
    }

    /// # Errors
    ///
    /// [`PeerError::VerificationFailed`] when this block completes the piece
    /// but the joined data does not match its hash. The piece stays
    /// registered with no blocks, ready to be requested again.
    pub fn add_block(&mut self, block: Block) -> Result<BlockOutcome, PeerError> {
        let Some(progress) = self.pieces.get_mut(&block.piece) else {
            debug!(
                "unsolicited block for piece {} at offset {}",
                block.piece, block.offset
            );
            return Ok(BlockOutcome::Unsolicited);
        };

        let aligned = block.offset % BLOCK_SIZE == 0 && block.offset < progress.length;
        if !aligned || block.data.len() as u32 != block_length(progress.length, block.offset) {
            debug!(
                "discarding misfit block for piece {}: offset {}, {} bytes",
                block.piece,
                block.offset,
                block.data.len()
            );
            return Ok(BlockOutcome::Discarded);
        }

        if progress.blocks.contains_key(&block.offset) {
            trace!(
                "duplicate block for piece {} at offset {}",
                block.piece,
                block.offset
            );
            return Ok(BlockOutcome::Duplicate);
        }

        progress.blocks.insert(block.offset, block.data);
        if progress.blocks.len() < block_count(progress.length) as usize {
            return Ok(BlockOutcome::Pending);
        }

        let mut data = BytesMut::with_capacity(progress.length as usize);
        for chunk in progress.blocks.values() {
            data.extend_from_slice(chunk);
        }
        let data = data.freeze();

        if !verify_piece(&data, &progress.hash) {
            progress.blocks.clear();
            return Err(PeerError::VerificationFailed { piece: block.piece });
        }

        self.pieces.remove(&block.piece);
        Ok(BlockOutcome::Complete(data))
    }
}

/// True if `data` hashes to `hash`.
pub fn verify_piece(data: &[u8], hash: &[u8; 20]) -> bool {
    sha1_digest(data) == *hash
}
