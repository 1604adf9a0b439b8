//! Piece-completion bitmap: one bit per piece, MSB first, zstd-compressed.
//!
//! Uncompressed layout is `ceil(total_pieces / 8)` bytes; bit 7 of byte 0 is
//! piece 0. Padding bits in the last byte are written as zero and ignored on
//! decode.

use std::collections::BTreeSet;
use std::io::Read;

/// Compression level for the bitmap payload. Bitmaps are small; favour speed.
const ZSTD_LEVEL: i32 = 3;

/// Failure to turn a stored bitmap back into a piece set.
#[derive(Debug, thiserror::Error)]
pub enum BitmapError {
    #[error("decompress error: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("bitmap is {actual} bytes, expected {expected} for {total_pieces} pieces")]
    Length {
        expected: usize,
        /// Decompressed length, counted no further than `expected + 1`.
        actual: usize,
        total_pieces: usize,
    },
}

/// Number of bytes needed for `total_pieces` bits.
pub fn bitmap_len(total_pieces: usize) -> usize {
    total_pieces.div_ceil(8)
}

/// Bit-pack `verified` (MSB first) without compressing. Indices that do not
/// convert to `usize` or fall outside `[0, total_pieces)` are dropped.
pub fn pack<I>(verified: I, total_pieces: usize) -> Vec<u8>
where
    I: IntoIterator,
    I::Item: TryInto<usize>,
{
    let mut bytes = vec![0u8; bitmap_len(total_pieces)];
    for index in verified {
        let Ok(index) = index.try_into() else {
            continue;
        };
        if index >= total_pieces {
            continue;
        }
        bytes[index / 8] |= 0x80 >> (index % 8);
    }
    bytes
}

/// Unpack an uncompressed bitmap. Bits at or past `total_pieces` are ignored.
pub fn unpack(bytes: &[u8], total_pieces: usize) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    for (byte_index, &byte) in bytes.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        for bit in 0..8 {
            let index = byte_index * 8 + bit;
            if index >= total_pieces {
                break;
            }
            if byte & (0x80 >> bit) != 0 {
                out.insert(index);
            }
        }
    }
    out
}

/// Encode the verified set for `total_pieces` pieces: pack, then compress.
pub fn encode_bitmap<I>(verified: I, total_pieces: usize) -> Vec<u8>
where
    I: IntoIterator,
    I::Item: TryInto<usize>,
{
    let packed = pack(verified, total_pieces);
    // compressing an in-memory slice into a Vec cannot hit an I/O error
    zstd::encode_all(packed.as_slice(), ZSTD_LEVEL).unwrap_or_else(|_| Vec::new())
}

/// Decode a bitmap, reporting why it could not be decoded. Decompression
/// stops one byte past the expected length, so a hostile frame cannot inflate
/// beyond that.
pub fn try_decode_bitmap(bytes: &[u8], total_pieces: usize) -> Result<BTreeSet<usize>, BitmapError> {
    let expected = bitmap_len(total_pieces);
    let mut packed = Vec::with_capacity(expected);
    zstd::stream::read::Decoder::with_buffer(bytes)?
        .take(expected as u64 + 1)
        .read_to_end(&mut packed)?;
    if packed.len() != expected {
        return Err(BitmapError::Length {
            expected,
            actual: packed.len(),
            total_pieces,
        });
    }
    Ok(unpack(&packed, total_pieces))
}

/// Decode a bitmap. Any corruption yields the empty set: no verified pieces
/// is always a safe state to resume from.
pub fn decode_bitmap(bytes: &[u8], total_pieces: usize) -> BTreeSet<usize> {
    match try_decode_bitmap(bytes, total_pieces) {
        Ok(set) => set,
        Err(e) => {
            tracing::debug!(error = %e, "discarding undecodable bitmap");
            BTreeSet::new()
        }
    }
}
