use bytes::Bytes;

/// The set of pieces a peer has declared, from BITFIELD and HAVE messages.
///
/// Bits are numbered from the high bit of the first byte. The bitfield may
/// be built before the piece count is known (during a metadata fetch), so
/// it grows when a HAVE names a piece past its end, up to a caller-supplied
/// piece limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// Takes a BITFIELD payload as-is.
    pub fn from_bytes(bytes: &Bytes) -> Self {
        Self {
            bits: bytes.to_vec(),
        }
    }

    /// Returns true if the piece at the given index is available.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let bit_index = 7 - (index % 8);
        self.bits
            .get(byte_index)
            .is_some_and(|b| (b >> bit_index) & 1 == 1)
    }

    /// Sets the bit for the piece at the given index. Indexes at or past
    /// `limit` are refused and `false` is returned.
    pub fn set_piece(&mut self, index: u32, limit: u32) -> bool {
        if index >= limit {
            return false;
        }
        let byte_index = (index / 8) as usize;
        if byte_index >= self.bits.len() {
            self.bits.resize(byte_index + 1, 0);
        }
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
        true
    }

    /// Returns the number of pieces that are available.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if no pieces are available.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Returns the raw bytes of the bitfield.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
