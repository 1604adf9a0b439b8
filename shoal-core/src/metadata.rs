//! Immutable torrent metadata the engine and the resume validator work against.

use crate::identity::{InfoHash, PieceHash, HASH_LEN};

/// Layout and expected hashes of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    /// Expected content identity, when the caller knows it.
    pub info_hash: Option<InfoHash>,
    /// Nominal piece length; every piece but the last has this length.
    pub piece_length: u32,
    /// Total content length in bytes.
    pub total_length: u64,
    /// One expected SHA-1 digest per piece.
    pub piece_hashes: Vec<PieceHash>,
}

impl TorrentMetadata {
    pub fn new(
        info_hash: Option<InfoHash>,
        piece_length: u32,
        total_length: u64,
        piece_hashes: Vec<PieceHash>,
    ) -> Self {
        Self {
            info_hash,
            piece_length,
            total_length,
            piece_hashes,
        }
    }

    /// Build from the concatenated 20-byte hash string found in a torrent's info
    /// dictionary. Returns None if its length is not a multiple of 20.
    pub fn from_pieces(
        info_hash: Option<InfoHash>,
        piece_length: u32,
        total_length: u64,
        pieces: &[u8],
    ) -> Option<Self> {
        if pieces.len() % HASH_LEN != 0 {
            return None;
        }
        let piece_hashes = pieces
            .chunks_exact(HASH_LEN)
            .map(|c| {
                let mut h = [0u8; HASH_LEN];
                h.copy_from_slice(c);
                h
            })
            .collect();
        Some(Self::new(info_hash, piece_length, total_length, piece_hashes))
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of the piece at `index`; the last piece holds the remainder.
    /// Returns None for an out-of-range index.
    pub fn piece_len(&self, index: usize) -> Option<u32> {
        if index >= self.piece_count() {
            return None;
        }
        let start = index as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(start);
        Some(remaining.min(self.piece_length as u64) as u32)
    }

    pub fn expected_hash(&self, index: usize) -> Option<&PieceHash> {
        self.piece_hashes.get(index)
    }
}
