//! Piece storage in one pre-allocated file laid out as the concatenation of
//! all pieces.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use shoal_core::integrity::hash_piece;
use shoal_core::{BlockSource, PieceHash, TorrentMetadata};

pub struct FileBlockSource {
    file: File,
    piece_length: u64,
    total_length: u64,
}

impl FileBlockSource {
    /// Open or create `path` and size it to the transfer's total length.
    /// Existing contents are kept so a restart can re-check them.
    pub fn open(path: &Path, metadata: &TorrentMetadata) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != metadata.total_length {
            file.set_len(metadata.total_length)?;
        }
        Ok(Self {
            file,
            piece_length: u64::from(metadata.piece_length),
            total_length: metadata.total_length,
        })
    }

    /// Byte range of a piece, or None if it lies outside the file.
    fn piece_range(&self, piece_index: usize) -> Option<(u64, u64)> {
        let start = (piece_index as u64).checked_mul(self.piece_length)?;
        if start >= self.total_length {
            return None;
        }
        let end = (start + self.piece_length).min(self.total_length);
        Some((start, end))
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

fn out_of_range(piece_index: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("piece {piece_index} out of range"),
    )
}

impl BlockSource for FileBlockSource {
    fn write_block(&self, piece_index: usize, begin: u32, data: &[u8]) -> io::Result<()> {
        let (start, end) = self
            .piece_range(piece_index)
            .ok_or_else(|| out_of_range(piece_index))?;
        let offset = start + u64::from(begin);
        if offset + data.len() as u64 > end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block at {begin} overruns piece {piece_index}"),
            ));
        }
        self.file.write_all_at(data, offset)
    }

    fn read_and_hash(&self, piece_index: usize) -> io::Result<PieceHash> {
        let (start, end) = self
            .piece_range(piece_index)
            .ok_or_else(|| out_of_range(piece_index))?;
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact_at(&mut buf, start)?;
        Ok(hash_piece(&buf))
    }
}
