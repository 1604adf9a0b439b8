//! Pieces: independently verifiable units assembled from blocks.

use crate::block::{effective_block_size, split_into_blocks, Block};

/// Download state of a piece.
///
/// `Missing -> Downloading -> Complete -> Verified`; `Complete` and `Verified`
/// fall back to `Missing` on a hash mismatch or an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceState {
    /// No block received since the last reset.
    Missing,
    /// At least one block received.
    Downloading,
    /// Every block received; hash not yet checked.
    Complete,
    /// Hash matched the manifest.
    Verified,
}

/// One piece of the transfer and the blocks it owns.
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: usize,
    pub length: u32,
    pub(crate) block_size: u32,
    pub(crate) blocks: Vec<Block>,
    pub(crate) state: PieceState,
    pub(crate) hash_verified: bool,
    /// Verified from a resume snapshot; the bytes live on disk, not in `blocks`.
    pub(crate) restored: bool,
    pub(crate) received_count: usize,
    /// Bumped on every reset so a verification started before it is discarded.
    pub(crate) generation: u64,
}

impl Piece {
    pub fn new(index: usize, length: u32, block_size: u32) -> Self {
        let block_size = effective_block_size(block_size);
        Self {
            index,
            length,
            block_size,
            blocks: split_into_blocks(index, length, block_size),
            state: PieceState::Missing,
            hash_verified: false,
            restored: false,
            received_count: 0,
            generation: 0,
        }
    }

    pub fn state(&self) -> PieceState {
        self.state
    }

    pub fn is_hash_verified(&self) -> bool {
        self.hash_verified
    }

    /// The piece's blocks in offset order. While the piece is `Complete` its
    /// buffers are lent to the verifier: every block reads as received but
    /// its data is empty until verification returns them.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Index of the block starting exactly at `begin`, if any.
    pub(crate) fn block_at(&self, begin: u32) -> Option<usize> {
        if begin % self.block_size != 0 {
            return None;
        }
        let index = (begin / self.block_size) as usize;
        (index < self.blocks.len()).then_some(index)
    }

    pub(crate) fn is_fully_received(&self) -> bool {
        !self.blocks.is_empty() && self.received_count == self.blocks.len()
    }

    /// Lends every block buffer out for hashing. The blocks stay `received`.
    pub(crate) fn take_buffers(&mut self) -> Vec<Vec<u8>> {
        self.blocks
            .iter_mut()
            .map(|b| std::mem::take(&mut b.data))
            .collect()
    }

    pub(crate) fn restore_buffers(&mut self, buffers: Vec<Vec<u8>>) {
        for (block, data) in self.blocks.iter_mut().zip(buffers) {
            block.data = data;
        }
    }

    /// Assembled bytes in ascending offset order.
    pub(crate) fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        for block in &self.blocks {
            out.extend_from_slice(&block.data);
        }
        out
    }

    /// Full reset back to `Missing`: every buffer and received flag cleared.
    pub(crate) fn reset(&mut self) {
        for block in &mut self.blocks {
            block.clear();
        }
        self.state = PieceState::Missing;
        self.hash_verified = false;
        self.restored = false;
        self.received_count = 0;
        self.generation += 1;
    }

    /// Marks the piece verified without in-memory data (restored from a snapshot).
    pub(crate) fn mark_restored(&mut self) {
        self.reset();
        self.state = PieceState::Verified;
        self.hash_verified = true;
        self.restored = true;
    }
}
