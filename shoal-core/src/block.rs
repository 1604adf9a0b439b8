//! Blocks: the sub-piece fragments exchanged with peers.

use std::fmt;

use crate::config::DEFAULT_BLOCK_SIZE;

/// A fixed-size chunk of a piece. All blocks of a piece have the same length
/// except possibly the last, which holds the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The index of the piece of which this is a block.
    pub piece_index: usize,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// Declared length in bytes.
    pub length: u32,
    /// Received bytes. Empty until received; exactly `length` bytes afterwards,
    /// except while the owning piece is `Complete` and the buffer is lent to
    /// the verifier.
    pub(crate) data: Vec<u8>,
    pub(crate) received: bool,
}

impl Block {
    pub fn new(piece_index: usize, begin: u32, length: u32) -> Self {
        Self {
            piece_index,
            begin,
            length,
            data: Vec::new(),
            received: false,
        }
    }

    pub fn is_received(&self) -> bool {
        self.received
    }

    /// Empty while the owning piece is being verified (see [`crate::piece::Piece::blocks`]).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Drops the buffer and the received flag.
    pub(crate) fn clear(&mut self) {
        self.data = Vec::new();
        self.received = false;
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(piece: {} begin: {} len: {})",
            self.piece_index, self.begin, self.length
        )
    }
}

pub(crate) fn effective_block_size(block_size: u32) -> u32 {
    if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    }
}

/// Returns the number of blocks in a piece of the given length.
pub fn block_count(piece_len: u32, block_size: u32) -> usize {
    let block_size = effective_block_size(block_size);
    // the last block may be shorter, so round up
    (piece_len as usize).div_ceil(block_size as usize)
}

/// Returns the length of the block at `block_index`, or None past the end of the piece.
pub fn block_len(piece_len: u32, block_size: u32, block_index: usize) -> Option<u32> {
    let block_size = effective_block_size(block_size);
    let offset = (block_index as u64) * block_size as u64;
    if offset >= piece_len as u64 {
        return None;
    }
    Some((piece_len as u64 - offset).min(block_size as u64) as u32)
}

/// Split a piece into blocks covering `[0, piece_len)` with no gaps or overlaps.
/// A zero `block_size` falls back to [`DEFAULT_BLOCK_SIZE`].
pub fn split_into_blocks(piece_index: usize, piece_len: u32, block_size: u32) -> Vec<Block> {
    let block_size = effective_block_size(block_size);
    (0..block_count(piece_len, block_size))
        .map_while(|i| {
            let length = block_len(piece_len, block_size, i)?;
            Some(Block::new(piece_index, i as u32 * block_size, length))
        })
        .collect()
}
