//! Startup restore: load, decode, migrate, validate and spot-check a stored
//! snapshot, and decide how the engine should start.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::config::ResumeConfig;
use crate::engine::AssemblyEngine;
use crate::identity::InfoHash;
use crate::metadata::TorrentMetadata;
use crate::migrate::migrate;
use crate::recovery::{self, handle_corrupted_resume, verify_integrity};
use crate::snapshot::ResumeSnapshot;
use crate::store::{BlockSource, ResumeStore};
use crate::validate::{validate, ValidationError};
use crate::wire;

/// Why stored resume data could not be trusted.
#[derive(Debug)]
pub enum RecheckReason {
    /// The store failed or the blob did not decode.
    Unreadable(String),
    /// The snapshot decoded but does not match this transfer.
    Invalid(Vec<ValidationError>),
    /// Pieces the snapshot claims verified failed re-hashing.
    SpotCheckFailed(Vec<usize>),
}

/// How the engine should start.
#[derive(Debug)]
pub enum RestorePlan {
    /// Nothing stored for this transfer.
    Fresh,
    /// Trust the snapshot: seed `verified` into the engine.
    Seed {
        snapshot: ResumeSnapshot,
        verified: BTreeSet<usize>,
        /// False if migration stopped below the configured target version.
        migration_complete: bool,
    },
    /// Re-hash every piece from storage. `checkpoint` carries reusable session facts.
    Recheck {
        reason: RecheckReason,
        checkpoint: Option<ResumeSnapshot>,
    },
}

impl RestorePlan {
    /// Bring `engine` to the planned starting state. For a re-check this
    /// re-hashes every piece from `source` and seeds the ones that match.
    /// Returns the number of pieces seeded.
    pub fn apply<B>(&self, engine: &AssemblyEngine, metadata: &TorrentMetadata, source: &B) -> usize
    where
        B: BlockSource + ?Sized,
    {
        match self {
            RestorePlan::Fresh => 0,
            RestorePlan::Seed { verified, .. } => engine.seed_verified(verified.iter().copied()),
            RestorePlan::Recheck { .. } => {
                engine.reset_all();
                engine.seed_verified(recovery::recheck_all(metadata, source))
            }
        }
    }

    pub fn snapshot(&self) -> Option<&ResumeSnapshot> {
        match self {
            RestorePlan::Fresh => None,
            RestorePlan::Seed { snapshot, .. } => Some(snapshot),
            RestorePlan::Recheck { checkpoint, .. } => checkpoint.as_ref(),
        }
    }
}

/// Decide how to start the transfer identified by `info_hash`. Falls back to
/// the checkpoint when the current blob is missing. Never fails: every
/// problem degrades to a full re-check.
pub fn restore<S, B>(
    store: &S,
    info_hash: &InfoHash,
    metadata: &TorrentMetadata,
    source: &B,
    config: &ResumeConfig,
) -> RestorePlan
where
    S: ResumeStore + ?Sized,
    B: BlockSource + ?Sized,
{
    let mut from_checkpoint = false;
    let blob = match store.load(info_hash) {
        Ok(Some(blob)) => Ok(blob),
        // a crash while replacing the blob can leave only the checkpoint behind
        Ok(None) => match store.load_checkpoint(info_hash) {
            Ok(Some(blob)) => {
                warn!(%info_hash, "resume data missing, restoring from checkpoint");
                from_checkpoint = true;
                Ok(blob)
            }
            Ok(None) => {
                info!(%info_hash, "no resume data, starting fresh");
                return RestorePlan::Fresh;
            }
            Err(e) => Err(e.to_string()),
        },
        Err(e) => Err(e.to_string()),
    };
    let decoded = blob.and_then(|blob| wire::decode_snapshot(&blob).map_err(|e| e.to_string()));
    let snapshot = match decoded {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            let err = std::io::Error::new(std::io::ErrorKind::InvalidData, reason.clone());
            let checkpoint = if from_checkpoint {
                None
            } else {
                load_checkpoint(store, info_hash)
            };
            let directive = handle_corrupted_resume(&err, checkpoint);
            return RestorePlan::Recheck {
                reason: RecheckReason::Unreadable(reason),
                checkpoint: directive.into_checkpoint(),
            };
        }
    };

    let migration = migrate(snapshot, config.target_version);
    let migration_complete = migration.is_complete();
    if !migration_complete {
        warn!(
            %info_hash,
            reached = migration.reached(),
            target = migration.target,
            "snapshot could not be migrated to target version"
        );
    }
    let snapshot = migration.snapshot;

    let report = validate(&snapshot, metadata);
    if !report.is_valid() {
        for e in &report.errors {
            warn!(%info_hash, error = %e, "snapshot rejected");
        }
        return RestorePlan::Recheck {
            reason: RecheckReason::Invalid(report.errors),
            checkpoint: None,
        };
    }

    let integrity = verify_integrity(&snapshot, metadata, source, config.spot_check_samples);
    if !integrity.is_valid() {
        return RestorePlan::Recheck {
            reason: RecheckReason::SpotCheckFailed(integrity.failed_pieces),
            checkpoint: Some(snapshot),
        };
    }

    let verified = snapshot.verified();
    info!(
        %info_hash,
        verified = verified.len(),
        pieces = metadata.piece_count(),
        spot_checked = integrity.sampled.len(),
        "resume data accepted"
    );
    RestorePlan::Seed {
        snapshot,
        verified,
        migration_complete,
    }
}

/// Decoded checkpoint blob, if the store has one and it is intact.
fn load_checkpoint<S>(store: &S, info_hash: &InfoHash) -> Option<ResumeSnapshot>
where
    S: ResumeStore + ?Sized,
{
    let blob = store.load_checkpoint(info_hash).ok().flatten()?;
    wire::decode_snapshot(&blob)
        .ok()
        .filter(|s| s.info_hash == *info_hash)
}
