//! Defences against resume data that passed structural checks but is wrong:
//! spot-check re-hashing, full re-check, and the corrupted-snapshot fallback.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::metadata::TorrentMetadata;
use crate::snapshot::ResumeSnapshot;
use crate::store::BlockSource;

/// Result of re-hashing a sample of supposedly verified pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Pieces that were re-hashed, ascending.
    pub sampled: Vec<usize>,
    /// Sampled pieces whose digest did not match or could not be read, ascending.
    pub failed_pieces: Vec<usize>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.failed_pieces.is_empty()
    }
}

/// Re-hash up to `sample_size` pieces drawn uniformly from the snapshot's
/// verified set. A zero sample or an empty set is trivially valid.
pub fn verify_integrity<B>(
    snapshot: &ResumeSnapshot,
    metadata: &TorrentMetadata,
    source: &B,
    sample_size: usize,
) -> IntegrityReport
where
    B: BlockSource + ?Sized,
{
    verify_integrity_with_rng(snapshot, metadata, source, sample_size, &mut rand::thread_rng())
}

pub fn verify_integrity_with_rng<B, R>(
    snapshot: &ResumeSnapshot,
    metadata: &TorrentMetadata,
    source: &B,
    sample_size: usize,
    rng: &mut R,
) -> IntegrityReport
where
    B: BlockSource + ?Sized,
    R: Rng + ?Sized,
{
    if sample_size == 0 {
        return IntegrityReport::default();
    }
    let verified: Vec<usize> = snapshot.verified().into_iter().collect();
    if verified.is_empty() {
        return IntegrityReport::default();
    }

    let mut sampled: Vec<usize> = verified
        .choose_multiple(rng, sample_size.min(verified.len()))
        .copied()
        .collect();
    sampled.sort_unstable();

    let failed_pieces: Vec<usize> = sampled
        .iter()
        .copied()
        .filter(|&index| !piece_matches(metadata, source, index))
        .collect();
    if failed_pieces.is_empty() {
        debug!(sampled = sampled.len(), "spot check passed");
    } else {
        warn!(
            sampled = sampled.len(),
            failed = failed_pieces.len(),
            "spot check found corrupt pieces"
        );
    }
    IntegrityReport {
        sampled,
        failed_pieces,
    }
}

fn piece_matches<B>(metadata: &TorrentMetadata, source: &B, index: usize) -> bool
where
    B: BlockSource + ?Sized,
{
    let Some(expected) = metadata.expected_hash(index) else {
        return false;
    };
    match source.read_and_hash(index) {
        Ok(digest) => digest == *expected,
        Err(e) => {
            debug!(piece = index, error = %e, "piece unreadable during check");
            false
        }
    }
}

/// Re-hash every piece from storage. Returns the pieces that match the manifest.
pub fn recheck_all<B>(metadata: &TorrentMetadata, source: &B) -> BTreeSet<usize>
where
    B: BlockSource + ?Sized,
{
    let good: BTreeSet<usize> = (0..metadata.piece_count())
        .filter(|&index| piece_matches(metadata, source, index))
        .collect();
    info!(
        verified = good.len(),
        pieces = metadata.piece_count(),
        "full recheck finished"
    );
    good
}

/// What to do after resume data turned out to be unusable. Every directive
/// requires re-hashing the whole transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDirective<C> {
    /// Reuse the checkpoint's session facts, but re-check every piece.
    RecheckFromCheckpoint(C),
    /// Nothing to reuse; start from scratch.
    FullRecheck,
}

impl<C> RecoveryDirective<C> {
    pub fn requires_full_recheck(&self) -> bool {
        true
    }

    pub fn checkpoint(&self) -> Option<&C> {
        match self {
            RecoveryDirective::RecheckFromCheckpoint(c) => Some(c),
            RecoveryDirective::FullRecheck => None,
        }
    }

    pub fn into_checkpoint(self) -> Option<C> {
        match self {
            RecoveryDirective::RecheckFromCheckpoint(c) => Some(c),
            RecoveryDirective::FullRecheck => None,
        }
    }
}

/// Turn a resume failure into a directive. Never fails.
pub fn handle_corrupted_resume<C>(
    error: &dyn std::error::Error,
    checkpoint: Option<C>,
) -> RecoveryDirective<C> {
    match checkpoint {
        Some(checkpoint) => {
            warn!(error = %error, "resume data corrupt, falling back to checkpoint with full recheck");
            RecoveryDirective::RecheckFromCheckpoint(checkpoint)
        }
        None => {
            warn!(error = %error, "resume data corrupt, no checkpoint, full recheck required");
            RecoveryDirective::FullRecheck
        }
    }
}
