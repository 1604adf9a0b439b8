//! Checks a loaded snapshot against the metadata of the transfer it claims to describe.

use crate::bitmap::{self, BitmapError};
use crate::identity::InfoHash;
use crate::metadata::TorrentMetadata;
use crate::snapshot::ResumeSnapshot;

/// One problem found in a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("info hash mismatch: expected {expected}, snapshot has {found}")]
    InfoHashMismatch { expected: InfoHash, found: InfoHash },
    #[error("bitmap could not be decoded: {0}")]
    CorruptBitmap(BitmapError),
    #[error("{verified} pieces marked verified but the transfer has {total}")]
    TooManyPieces { verified: usize, total: usize },
    #[error("{count} verified piece indices out of range (first {first}, total {total})")]
    PiecesOutOfRange {
        count: usize,
        first: usize,
        total: usize,
    },
}

/// Every problem found by [`validate`]. Empty means the snapshot can be trusted.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate `snapshot` against `metadata`. Does not stop at the first problem.
pub fn validate(snapshot: &ResumeSnapshot, metadata: &TorrentMetadata) -> ValidationReport {
    let mut errors = Vec::new();
    let total = metadata.piece_count();

    if let Some(expected) = metadata.info_hash {
        if expected != snapshot.info_hash {
            errors.push(ValidationError::InfoHashMismatch {
                expected,
                found: snapshot.info_hash,
            });
        }
    }

    let verified = match bitmap::try_decode_bitmap(&snapshot.bitmap, snapshot.total_pieces) {
        Ok(set) => set,
        Err(e) => {
            errors.push(ValidationError::CorruptBitmap(e));
            Default::default()
        }
    };

    if verified.len() > total {
        errors.push(ValidationError::TooManyPieces {
            verified: verified.len(),
            total,
        });
    }

    let mut out_of_range = verified.range(total..);
    if let Some(&first) = out_of_range.next() {
        errors.push(ValidationError::PiecesOutOfRange {
            count: 1 + out_of_range.count(),
            first,
            total,
        });
    }

    if !errors.is_empty() {
        tracing::debug!(
            info_hash = %snapshot.info_hash,
            errors = errors.len(),
            "snapshot failed validation"
        );
    }
    ValidationReport { errors }
}
