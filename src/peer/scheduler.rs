use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::message::{Message, REQUEST_FRAME_LEN};
use super::piece::{block_count, block_length, Block, BlockRequest};
use crate::constants::BLOCK_SIZE;

/// Splits one piece into block requests and tracks which are outstanding.
///
/// Requests move from *pending* to *in flight* when handed out and leave
/// when the matching block arrives. A choke sends everything in flight back
/// to the front of the pending queue.
///
/// ```
/// use btwire::peer::BlockScheduler;
///
/// let mut scheduler = BlockScheduler::new(3, 40_000);
/// let lengths: Vec<u32> = std::iter::from_fn(|| scheduler.next_request())
///     .map(|r| r.length)
///     .collect();
/// assert_eq!(lengths, [16_384, 16_384, 7_232]);
/// ```
#[derive(Debug, Clone)]
pub struct BlockScheduler {
    piece: u32,
    piece_length: u32,
    pending: VecDeque<BlockRequest>,
    in_flight: Vec<BlockRequest>,
}

impl BlockScheduler {
    pub fn new(piece: u32, piece_length: u32) -> Self {
        let pending = (0..block_count(piece_length))
            .map(|i| {
                let offset = i * BLOCK_SIZE;
                BlockRequest::new(piece, offset, block_length(piece_length, offset))
            })
            .collect();

        Self {
            piece,
            piece_length,
            pending,
            in_flight: Vec::new(),
        }
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn block_count(&self) -> u32 {
        block_count(self.piece_length)
    }

    /// Hands out the next pending request and marks it in flight.
    pub fn next_request(&mut self) -> Option<BlockRequest> {
        let req = self.pending.pop_front()?;
        self.in_flight.push(req);
        Some(req)
    }

    /// Clears the request this block answers. A block for a request that a
    /// choke sent back to the pending queue still counts, so it is not asked
    /// for twice. Returns false if the block matches nothing we asked for.
    pub fn complete(&mut self, block: &Block) -> bool {
        let answered = block.request();
        if let Some(i) = self.in_flight.iter().position(|r| *r == answered) {
            self.in_flight.swap_remove(i);
            return true;
        }
        if let Some(i) = self.pending.iter().position(|r| *r == answered) {
            self.pending.remove(i);
            return true;
        }
        false
    }

    /// Returns every in-flight request to the front of the queue, in offset
    /// order. Called when the peer chokes us.
    pub fn requeue_in_flight(&mut self) -> usize {
        let n = self.in_flight.len();
        self.in_flight.sort_unstable();
        for req in self.in_flight.drain(..).rev() {
            self.pending.push_front(req);
        }
        n
    }

    /// Puts every block of the piece back in the pending queue.
    pub fn reset(&mut self) {
        *self = Self::new(self.piece, self.piece_length);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

/// Local buffer of encoded REQUEST messages.
///
/// Requests are encoded as they are scheduled and written out in batches of
/// at most `batch` messages, so a burst of requests costs one write instead
/// of one per block.
#[derive(Debug)]
pub struct RequestPipeline {
    buf: BytesMut,
    queued: usize,
    batch: usize,
}

impl RequestPipeline {
    pub fn new(batch: usize) -> Self {
        let batch = batch.max(1);
        Self {
            buf: BytesMut::with_capacity(batch * REQUEST_FRAME_LEN),
            queued: 0,
            batch,
        }
    }

    /// Encodes `req` into the buffer. Returns true once the batch is full
    /// and must be flushed before more requests are queued.
    pub fn push(&mut self, req: BlockRequest) -> bool {
        Message::Request(req).encode_into(&mut self.buf);
        self.queued += 1;
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.queued >= self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Removes and returns everything buffered, or `None` if nothing is.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.is_empty() {
            return None;
        }
        self.queued = 0;
        Some(self.buf.split().freeze())
    }
}
