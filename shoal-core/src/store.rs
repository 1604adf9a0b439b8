//! Interfaces to the host's durable snapshot store and piece storage.

use std::collections::HashMap;
use std::io;

use parking_lot::Mutex;

use crate::identity::{InfoHash, PieceHash};
use crate::snapshot::ResumeSnapshot;
use crate::wire::{self, SnapshotEncodeError};

/// Error reading or writing the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] SnapshotEncodeError),
}

/// Durable home for serialized snapshots, keyed by info hash.
pub trait ResumeStore {
    /// Replace the stored blob. The blob it replaces becomes the checkpoint.
    fn save(&self, info_hash: &InfoHash, blob: &[u8]) -> Result<(), StoreError>;
    /// Most recent blob, or None if nothing was saved.
    fn load(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError>;
    /// Blob saved before the most recent one, if the store keeps it.
    fn load_checkpoint(&self, _info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
    fn remove(&self, info_hash: &InfoHash) -> Result<(), StoreError>;
}

/// Frame and store a snapshot under its own info hash.
pub fn save_snapshot<S>(store: &S, snapshot: &ResumeSnapshot) -> Result<(), StoreError>
where
    S: ResumeStore + ?Sized,
{
    let blob = wire::encode_snapshot(snapshot)?;
    store.save(&snapshot.info_hash, &blob)
}

/// Where verified piece bytes live once assembled.
pub trait BlockSource {
    fn write_block(&self, piece_index: usize, begin: u32, data: &[u8]) -> io::Result<()>;
    /// Read a whole piece back and return its SHA-1 digest.
    fn read_and_hash(&self, piece_index: usize) -> io::Result<PieceHash>;
}

#[derive(Default)]
struct Slot {
    current: Option<Vec<u8>>,
    previous: Option<Vec<u8>>,
}

/// In-memory store keeping the latest blob and one checkpoint per transfer.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<InfoHash, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumeStore for MemoryStore {
    fn save(&self, info_hash: &InfoHash, blob: &[u8]) -> Result<(), StoreError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(*info_hash).or_default();
        slot.previous = slot.current.replace(blob.to_vec());
        Ok(())
    }

    fn load(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .slots
            .lock()
            .get(info_hash)
            .and_then(|s| s.current.clone()))
    }

    fn load_checkpoint(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .slots
            .lock()
            .get(info_hash)
            .and_then(|s| s.previous.clone()))
    }

    fn remove(&self, info_hash: &InfoHash) -> Result<(), StoreError> {
        self.slots.lock().remove(info_hash);
        Ok(())
    }
}
