//! Engine and resume configuration. Hosts deserialize these from their config file.

use serde::Deserialize;

use crate::snapshot::SNAPSHOT_VERSION;

/// Standard sub-piece size (16 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

/// Default number of verified pieces re-hashed after loading a snapshot.
pub const DEFAULT_SPOT_CHECK_SAMPLES: usize = 8;

/// Default number of newly verified pieces between snapshot refreshes.
pub const DEFAULT_SAVE_EVERY_PIECES: usize = 16;

/// Where piece verification runs once a piece's last block arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Hash on the rayon pool; ingestion returns before the result is known.
    #[default]
    Background,
    /// Hash on the ingestion call path. Deterministic; meant for tests.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Sub-piece size in bytes (default 16 KiB). The last block of a piece is truncated.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    #[serde(default)]
    pub verification: VerificationMode,
}

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            verification: VerificationMode::default(),
        }
    }
}

impl EngineConfig {
    /// Inline verification with the given block size.
    pub fn inline(block_size: u32) -> Self {
        Self {
            block_size,
            verification: VerificationMode::Inline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumeConfig {
    /// Pieces re-hashed after a snapshot loads (0 disables the spot check).
    #[serde(default = "default_spot_check_samples")]
    pub spot_check_samples: usize,
    /// Snapshot version loaded snapshots are migrated to.
    #[serde(default = "default_target_version")]
    pub target_version: u32,
    /// Verified pieces accumulated before the snapshot is refreshed.
    #[serde(default = "default_save_every_pieces")]
    pub save_every_pieces: usize,
}

fn default_spot_check_samples() -> usize {
    DEFAULT_SPOT_CHECK_SAMPLES
}
fn default_target_version() -> u32 {
    SNAPSHOT_VERSION
}
fn default_save_every_pieces() -> usize {
    DEFAULT_SAVE_EVERY_PIECES
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            spot_check_samples: default_spot_check_samples(),
            target_version: default_target_version(),
            save_every_pieces: default_save_every_pieces(),
        }
    }
}
