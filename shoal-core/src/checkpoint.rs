//! Batched snapshot refreshes: copy engine state into the snapshot every N
//! verified pieces or on a session change, never per bit.

use crate::config::ResumeConfig;
use crate::engine::AssemblyEngine;
use crate::snapshot::ResumeSnapshot;
use crate::store::{self, ResumeStore, StoreError};

#[derive(Debug, Clone)]
pub struct SaveBatcher {
    every: usize,
    pending_pieces: usize,
    session_dirty: bool,
}

impl SaveBatcher {
    /// Flush after `every` verified pieces (a zero batch flushes on every piece).
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            pending_pieces: 0,
            session_dirty: false,
        }
    }

    pub fn from_config(config: &ResumeConfig) -> Self {
        Self::new(config.save_every_pieces)
    }

    /// Record a verified piece. Returns true once a flush is due.
    pub fn piece_verified(&mut self) -> bool {
        self.pending_pieces += 1;
        self.should_flush()
    }

    /// Record a change to peers, queue or file selection.
    pub fn session_changed(&mut self) {
        self.session_dirty = true;
    }

    pub fn should_flush(&self) -> bool {
        self.session_dirty || self.pending_pieces >= self.every
    }

    pub fn pending_pieces(&self) -> usize {
        self.pending_pieces
    }

    /// Copy the engine's verified set into `snapshot` and clear the batch.
    pub fn flush(&mut self, engine: &AssemblyEngine, snapshot: &mut ResumeSnapshot) {
        let verified = engine.verified_pieces();
        snapshot.total_pieces = engine.piece_count();
        snapshot.set_verified(verified);
        self.pending_pieces = 0;
        self.session_dirty = false;
    }

    /// Flush and persist. The batch is cleared even if the store fails; the
    /// next flush rewrites the full state anyway.
    pub fn save<S>(
        &mut self,
        engine: &AssemblyEngine,
        snapshot: &mut ResumeSnapshot,
        store: &S,
    ) -> Result<(), StoreError>
    where
        S: ResumeStore + ?Sized,
    {
        self.flush(engine, snapshot);
        store::save_snapshot(store, snapshot)
    }
}
