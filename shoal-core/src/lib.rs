//! Shoal download correctness and persistence core.
//! Host-driven: no network I/O; the host feeds fragments and persists snapshots.

pub mod block;
pub mod config;
pub mod engine;
pub mod identity;
pub mod integrity;
pub mod metadata;
pub mod piece;

pub mod bitmap;
pub mod checkpoint;
pub mod migrate;
pub mod recovery;
pub mod restore;
pub mod snapshot;
pub mod store;
pub mod validate;
pub mod wire;

pub use bitmap::{decode_bitmap, encode_bitmap, try_decode_bitmap, BitmapError};
pub use checkpoint::SaveBatcher;
pub use config::{EngineConfig, ResumeConfig, VerificationMode};
pub use engine::{AssemblyEngine, EngineEvents, NoopEvents};
pub use identity::{InfoHash, PieceHash};
pub use metadata::TorrentMetadata;
pub use migrate::{migrate, Migration};
pub use piece::PieceState;
pub use recovery::{
    handle_corrupted_resume, verify_integrity, IntegrityReport, RecoveryDirective,
};
pub use restore::{restore, RecheckReason, RestorePlan};
pub use snapshot::{ResumeSnapshot, SNAPSHOT_VERSION};
pub use store::{BlockSource, MemoryStore, ResumeStore, StoreError};
pub use validate::{validate, ValidationError, ValidationReport};
pub use wire::{decode_snapshot, encode_snapshot, SnapshotDecodeError, SnapshotEncodeError};
