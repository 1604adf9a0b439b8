//! Snapshot format migration, one version step at a time.

use tracing::{debug, warn};

use crate::snapshot::{QueuePriority, ResumeSnapshot};

/// Outcome of [`migrate`]: the snapshot at whatever version was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub snapshot: ResumeSnapshot,
    /// Version the snapshot had on input.
    pub from: u32,
    /// Version the caller asked for.
    pub target: u32,
}

impl Migration {
    pub fn reached(&self) -> u32 {
        self.snapshot.version
    }

    /// True if the snapshot is at or above the requested version.
    pub fn is_complete(&self) -> bool {
        self.snapshot.version >= self.target
    }
}

/// Migrate `snapshot` up to `target_version`. Existing data is left untouched;
/// fields a version introduces get their defaults. Stops early, with a
/// warning, at a version that has no step defined.
pub fn migrate(mut snapshot: ResumeSnapshot, target_version: u32) -> Migration {
    let from = snapshot.version;
    while snapshot.version < target_version {
        if !step(&mut snapshot) {
            warn!(
                from,
                reached = snapshot.version,
                target = target_version,
                "no migration step defined, stopping"
            );
            break;
        }
        debug!(version = snapshot.version, "snapshot migrated one step");
    }
    Migration {
        snapshot,
        from,
        target: target_version,
    }
}

/// Applies the single step out of `snapshot.version`. Returns false if none exists.
fn step(snapshot: &mut ResumeSnapshot) -> bool {
    match snapshot.version {
        1 => {
            // v2: file selection and queue state
            snapshot.file_selection = Vec::new();
            snapshot.queue_position = None;
            snapshot.queue_priority = QueuePriority::default();
            snapshot.version = 2;
        }
        2 => {
            // v3: upload rate history
            snapshot.upload_statistics.rate_history.clear();
            snapshot.version = 3;
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InfoHash;
    use crate::snapshot::{PeerHint, SNAPSHOT_VERSION};

    fn v1_snapshot() -> ResumeSnapshot {
        let mut snap = ResumeSnapshot::new(InfoHash::from_bytes([5; 20]), 16);
        snap.set_verified([0usize, 3, 15]);
        snap.peer_connections.push(PeerHint {
            addr: "198.51.100.7:51413".into(),
            peer_id: None,
        });
        snap.upload_statistics.record_upload("198.51.100.7:51413", 1 << 20);
        snap.upload_statistics.rate_history.clear();
        snap.version = 1;
        snap
    }

    #[test]
    fn same_version_is_noop() {
        let mut snap = v1_snapshot();
        snap.version = 2;
        let migration = migrate(snap.clone(), 2);
        assert_eq!(migration.snapshot, snap);
        assert!(migration.is_complete());
    }

    #[test]
    fn newer_version_is_noop() {
        let mut snap = v1_snapshot();
        snap.version = 3;
        let migration = migrate(snap.clone(), 2);
        assert_eq!(migration.snapshot, snap);
        assert_eq!(migration.reached(), 3);
    }

    #[test]
    fn v1_to_v2_preserves_existing_fields() {
        let snap = v1_snapshot();
        let migration = migrate(snap.clone(), 2);
        let out = &migration.snapshot;
        assert_eq!(out.version, 2);
        assert!(migration.is_complete());
        assert_eq!(out.info_hash, snap.info_hash);
        assert_eq!(out.total_pieces, snap.total_pieces);
        assert_eq!(out.bitmap, snap.bitmap);
        assert_eq!(out.peer_connections, snap.peer_connections);
        assert_eq!(out.upload_statistics, snap.upload_statistics);
        assert_eq!(out.created_at, snap.created_at);
        assert_eq!(out.updated_at, snap.updated_at);
        assert!(out.file_selection.is_empty());
        assert_eq!(out.queue_position, None);
    }

    #[test]
    fn walks_to_current_version() {
        let migration = migrate(v1_snapshot(), SNAPSHOT_VERSION);
        assert_eq!(migration.from, 1);
        assert_eq!(migration.reached(), SNAPSHOT_VERSION);
        assert!(migration.is_complete());
    }

    #[test]
    fn unmapped_step_stops_and_reports() {
        let migration = migrate(v1_snapshot(), SNAPSHOT_VERSION + 2);
        assert_eq!(migration.reached(), SNAPSHOT_VERSION);
        assert!(!migration.is_complete());

        let mut snap = v1_snapshot();
        snap.version = 0;
        let migration = migrate(snap, 2);
        assert_eq!(migration.reached(), 0);
        assert!(!migration.is_complete());
    }
}
