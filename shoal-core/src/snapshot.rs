//! Resume snapshot: verified-piece bitmap plus auxiliary session facts.
//!
//! Version history:
//! - 1: bitmap, peer reconnection hints, upload counters.
//! - 2: per-file selection, queue position and priority.
//! - 3: bounded upload rate history.
//!
//! Each version has its own persisted layout. [`SnapshotV1`] and
//! [`SnapshotV2`] are the layouts older builds wrote; [`ResumeSnapshot`] is
//! the current one and the in-memory form of every version.

use std::collections::{BTreeSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::bitmap;
use crate::identity::InfoHash;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 3;

/// Oldest snapshot version still understood.
pub const MIN_SNAPSHOT_VERSION: u32 = 1;

/// Samples kept in the upload rate history.
pub const RATE_HISTORY_LEN: usize = 60;

/// Where a peer was reached last session. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHint {
    /// `host:port` the peer was connected on.
    pub addr: String,
    pub peer_id: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatistics {
    pub bytes_uploaded: u64,
    /// Peers that downloaded from us.
    pub contributors: BTreeSet<String>,
    /// Most recent upload rates in bytes per second, oldest first.
    pub rate_history: VecDeque<u64>,
}

impl UploadStatistics {
    pub fn record_upload(&mut self, peer: &str, bytes: u64) {
        self.bytes_uploaded = self.bytes_uploaded.saturating_add(bytes);
        self.contributors.insert(peer.to_owned());
    }

    /// Appends a rate sample, dropping the oldest past [`RATE_HISTORY_LEN`].
    pub fn record_rate(&mut self, bytes_per_sec: u64) {
        if self.rate_history.len() == RATE_HISTORY_LEN {
            self.rate_history.pop_front();
        }
        self.rate_history.push_back(bytes_per_sec);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilePriority {
    Skip,
    Low,
    #[default]
    Normal,
    High,
}

/// Per-file selection in a multi-file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelection {
    pub selected: bool,
    pub priority: FilePriority,
}

impl Default for FileSelection {
    fn default() -> Self {
        Self {
            selected: true,
            priority: FilePriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueuePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Persisted per-transfer resume state. A plain value: it holds no reference
/// into a live engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub version: u32,
    pub info_hash: InfoHash,
    /// Piece count the bitmap was encoded for.
    pub total_pieces: usize,
    /// Compressed piece-completion bitmap (see [`crate::bitmap`]).
    pub bitmap: Vec<u8>,
    pub peer_connections: Vec<PeerHint>,
    pub upload_statistics: UploadStatistics,
    /// Empty means every file selected at normal priority.
    pub file_selection: Vec<FileSelection>,
    pub queue_position: Option<u32>,
    pub queue_priority: QueuePriority,
    /// Unix seconds.
    pub created_at: u64,
    pub updated_at: u64,
}

impl ResumeSnapshot {
    /// A current-version snapshot with no verified pieces.
    pub fn new(info_hash: InfoHash, total_pieces: usize) -> Self {
        let now = unix_now();
        Self {
            version: SNAPSHOT_VERSION,
            info_hash,
            total_pieces,
            bitmap: bitmap::encode_bitmap(std::iter::empty::<usize>(), total_pieces),
            peer_connections: Vec::new(),
            upload_statistics: UploadStatistics::default(),
            file_selection: Vec::new(),
            queue_position: None,
            queue_priority: QueuePriority::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the bitmap with `verified` and bumps `updated_at`.
    pub fn set_verified<I>(&mut self, verified: I)
    where
        I: IntoIterator,
        I::Item: TryInto<usize>,
    {
        self.bitmap = bitmap::encode_bitmap(verified, self.total_pieces);
        self.touch();
    }

    /// Decoded verified set; empty if the bitmap is corrupt.
    pub fn verified(&self) -> BTreeSet<usize> {
        bitmap::decode_bitmap(&self.bitmap, self.total_pieces)
    }

    pub fn set_peer_connections(&mut self, peers: Vec<PeerHint>) {
        self.peer_connections = peers;
        self.touch();
    }

    pub fn set_queue(&mut self, position: Option<u32>, priority: QueuePriority) {
        self.queue_position = position;
        self.queue_priority = priority;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now().max(self.updated_at);
    }
}

/// Upload counters as persisted before version 3.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCountersV1 {
    pub bytes_uploaded: u64,
    pub contributors: BTreeSet<String>,
}

/// Version 1 persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotV1 {
    pub info_hash: InfoHash,
    pub total_pieces: usize,
    pub bitmap: Vec<u8>,
    pub peer_connections: Vec<PeerHint>,
    pub upload_statistics: UploadCountersV1,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Version 2 persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotV2 {
    pub info_hash: InfoHash,
    pub total_pieces: usize,
    pub bitmap: Vec<u8>,
    pub peer_connections: Vec<PeerHint>,
    pub upload_statistics: UploadCountersV1,
    pub file_selection: Vec<FileSelection>,
    pub queue_position: Option<u32>,
    pub queue_priority: QueuePriority,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<SnapshotV1> for ResumeSnapshot {
    /// Version stays 1; fields the layout lacks are defaulted until [`crate::migrate::migrate`] runs.
    fn from(v1: SnapshotV1) -> Self {
        Self {
            version: 1,
            info_hash: v1.info_hash,
            total_pieces: v1.total_pieces,
            bitmap: v1.bitmap,
            peer_connections: v1.peer_connections,
            upload_statistics: UploadStatistics {
                bytes_uploaded: v1.upload_statistics.bytes_uploaded,
                contributors: v1.upload_statistics.contributors,
                rate_history: VecDeque::new(),
            },
            file_selection: Vec::new(),
            queue_position: None,
            queue_priority: QueuePriority::default(),
            created_at: v1.created_at,
            updated_at: v1.updated_at,
        }
    }
}

impl From<SnapshotV2> for ResumeSnapshot {
    fn from(v2: SnapshotV2) -> Self {
        Self {
            version: 2,
            info_hash: v2.info_hash,
            total_pieces: v2.total_pieces,
            bitmap: v2.bitmap,
            peer_connections: v2.peer_connections,
            upload_statistics: UploadStatistics {
                bytes_uploaded: v2.upload_statistics.bytes_uploaded,
                contributors: v2.upload_statistics.contributors,
                rate_history: VecDeque::new(),
            },
            file_selection: v2.file_selection,
            queue_position: v2.queue_position,
            queue_priority: v2.queue_priority,
            created_at: v2.created_at,
            updated_at: v2.updated_at,
        }
    }
}

impl From<&ResumeSnapshot> for SnapshotV1 {
    fn from(s: &ResumeSnapshot) -> Self {
        Self {
            info_hash: s.info_hash,
            total_pieces: s.total_pieces,
            bitmap: s.bitmap.clone(),
            peer_connections: s.peer_connections.clone(),
            upload_statistics: UploadCountersV1 {
                bytes_uploaded: s.upload_statistics.bytes_uploaded,
                contributors: s.upload_statistics.contributors.clone(),
            },
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl From<&ResumeSnapshot> for SnapshotV2 {
    fn from(s: &ResumeSnapshot) -> Self {
        let v1 = SnapshotV1::from(s);
        Self {
            info_hash: v1.info_hash,
            total_pieces: v1.total_pieces,
            bitmap: v1.bitmap,
            peer_connections: v1.peer_connections,
            upload_statistics: v1.upload_statistics,
            file_selection: s.file_selection.clone(),
            queue_position: s.queue_position,
            queue_priority: s.queue_priority,
            created_at: v1.created_at,
            updated_at: v1.updated_at,
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
