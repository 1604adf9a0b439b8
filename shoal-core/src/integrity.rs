//! Integrity: per-piece SHA-1 digests and verification against the manifest.

use sha1::{Digest, Sha1};

use crate::identity::PieceHash;

/// Hash piece data. Returns 20-byte digest.
pub fn hash_piece(data: &[u8]) -> PieceHash {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a piece given as ordered block buffers, without concatenating them first.
pub fn hash_blocks<'a, I>(blocks: I) -> PieceHash
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha1::new();
    for block in blocks {
        hasher.update(block);
    }
    hasher.finalize().into()
}

/// Verify a piece given as ordered block buffers against its expected hash.
pub fn verify_blocks<'a, I>(blocks: I, expected_hash: &PieceHash) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    hash_blocks(blocks) == *expected_hash
}
