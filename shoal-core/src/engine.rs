//! Piece assembly and verification engine for one transfer.
//!
//! The host feeds untrusted fragments through [`AssemblyEngine::handle_fragment`]
//! and asks which pieces are still missing. Completed pieces are hashed either
//! inline or on the rayon pool, depending on [`VerificationMode`].
//!
//! All piece state, the completed/verified sets and the completion flag sit
//! behind one mutex. Hashing runs outside it: the piece's buffers are lent to
//! the verifier while the piece is `Complete`, and a per-piece generation
//! counter makes results that raced with a reset a no-op.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::block::effective_block_size;
use crate::config::{EngineConfig, VerificationMode};
use crate::identity::PieceHash;
use crate::integrity;
use crate::metadata::TorrentMetadata;
use crate::piece::{Piece, PieceState};

/// Notifications emitted by the engine. Each fires at most once per event and
/// never while the engine lock is held. A panicking callback is logged and
/// otherwise ignored.
pub trait EngineEvents: Send + Sync {
    /// Every block of the piece has arrived; verification is about to run.
    fn on_piece_completed(&self, _index: usize) {}
    /// The piece hashed to its expected digest.
    fn on_piece_verified(&self, _index: usize) {}
    /// Every piece is verified.
    fn on_download_complete(&self) {}
}

/// Events sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl EngineEvents for NoopEvents {}

struct State {
    pieces: Vec<Piece>,
    completed: BTreeSet<usize>,
    verified: BTreeSet<usize>,
    download_complete: bool,
    /// Background verifications scheduled but not yet applied.
    in_flight: usize,
}

struct Shared {
    state: Mutex<State>,
    idle: Condvar,
    piece_hashes: Vec<PieceHash>,
    piece_length: u32,
    total_length: u64,
    config: EngineConfig,
    events: Arc<dyn EngineEvents>,
}

/// Handle to a transfer's assembly engine. Cloning shares the same engine.
#[derive(Clone)]
pub struct AssemblyEngine {
    shared: Arc<Shared>,
}

impl AssemblyEngine {
    pub fn new(metadata: &TorrentMetadata, config: EngineConfig) -> Self {
        Self::with_events(metadata, config, Arc::new(NoopEvents))
    }

    pub fn with_events(
        metadata: &TorrentMetadata,
        config: EngineConfig,
        events: Arc<dyn EngineEvents>,
    ) -> Self {
        let block_size = effective_block_size(config.block_size);
        let pieces: Vec<Piece> = (0..metadata.piece_count())
            .map(|i| Piece::new(i, metadata.piece_len(i).unwrap_or(0), block_size))
            .collect();
        // nothing to download means nothing left to wait for
        let download_complete = pieces.is_empty();
        debug!(
            pieces = pieces.len(),
            piece_length = metadata.piece_length,
            block_size,
            mode = ?config.verification,
            "assembly engine created"
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pieces,
                    completed: BTreeSet::new(),
                    verified: BTreeSet::new(),
                    download_complete,
                    in_flight: 0,
                }),
                idle: Condvar::new(),
                piece_hashes: metadata.piece_hashes.clone(),
                piece_length: metadata.piece_length,
                total_length: metadata.total_length,
                config,
                events,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn piece_count(&self) -> usize {
        self.shared.piece_hashes.len()
    }

    pub fn piece_length(&self) -> u32 {
        self.shared.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.shared.total_length
    }

    /// Accepts one fragment of piece data. Returns false for fragments that do
    /// not address exactly one not-yet-received block, or that arrive while the
    /// piece is complete or verified.
    pub fn handle_fragment(&self, piece_index: usize, begin: u32, data: &[u8]) -> bool {
        let scheduled = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let Some(piece) = state.pieces.get_mut(piece_index) else {
                trace!(piece = piece_index, "fragment rejected: piece out of range");
                return false;
            };
            if matches!(piece.state, PieceState::Complete | PieceState::Verified) {
                trace!(piece = piece_index, offset = begin, "fragment rejected: piece already complete");
                return false;
            }
            let Some(block_index) = piece.block_at(begin) else {
                trace!(piece = piece_index, offset = begin, "fragment rejected: no block at offset");
                return false;
            };
            let block = &mut piece.blocks[block_index];
            if block.length as usize != data.len() {
                trace!(
                    piece = piece_index,
                    offset = begin,
                    expected = block.length,
                    got = data.len(),
                    "fragment rejected: length mismatch"
                );
                return false;
            }
            if block.received {
                trace!(piece = piece_index, offset = begin, "fragment rejected: duplicate");
                return false;
            }
            block.data = data.to_vec();
            block.received = true;
            piece.received_count += 1;
            if piece.state == PieceState::Missing {
                piece.state = PieceState::Downloading;
            }
            if !piece.is_fully_received() {
                return true;
            }

            piece.state = PieceState::Complete;
            let generation = piece.generation;
            let buffers = piece.take_buffers();
            state.completed.insert(piece_index);
            if self.shared.config.verification == VerificationMode::Background {
                state.in_flight += 1;
            }
            (generation, buffers)
        };

        let (generation, buffers) = scheduled;
        trace!(piece = piece_index, "piece complete, scheduling verification");
        self.notify("on_piece_completed", |e| e.on_piece_completed(piece_index));

        match self.shared.config.verification {
            VerificationMode::Inline => {
                self.verify_piece(piece_index, generation, buffers, false);
            }
            VerificationMode::Background => {
                let engine = self.clone();
                rayon::spawn(move || engine.verify_piece(piece_index, generation, buffers, true));
            }
        }
        true
    }

    /// Hashes a completed piece and applies the outcome. A mismatch resets the
    /// piece completely so it reads as never downloaded.
    fn verify_piece(&self, index: usize, generation: u64, buffers: Vec<Vec<u8>>, background: bool) {
        let matched = self.shared.piece_hashes.get(index).is_some_and(|expected| {
            integrity::verify_blocks(buffers.iter().map(Vec::as_slice), expected)
        });

        let mut verified_event = false;
        let mut complete_event = false;
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let piece = &mut state.pieces[index];
            if piece.generation != generation || piece.state != PieceState::Complete {
                debug!(piece = index, "discarding verification result for reset piece");
            } else if matched {
                piece.restore_buffers(buffers);
                piece.state = PieceState::Verified;
                piece.hash_verified = true;
                state.completed.remove(&index);
                verified_event = state.verified.insert(index);
                complete_event = Self::check_download_complete(state);
                debug!(piece = index, verified = state.verified.len(), "piece verified");
            } else {
                warn!(piece = index, "piece hash mismatch, resetting");
                piece.reset();
                state.completed.remove(&index);
            }
            if background {
                state.in_flight -= 1;
                if state.in_flight == 0 {
                    self.shared.idle.notify_all();
                }
            }
        }

        if verified_event {
            self.notify("on_piece_verified", |e| e.on_piece_verified(index));
        }
        if complete_event {
            info!(pieces = self.piece_count(), "download complete");
            self.notify("on_download_complete", |e| e.on_download_complete());
        }
    }

    /// Sets the completion flag on the transition to all-verified. Returns true
    /// only for the call that performed the transition.
    fn check_download_complete(state: &mut State) -> bool {
        if !state.download_complete && state.verified.len() == state.pieces.len() {
            state.download_complete = true;
            return true;
        }
        false
    }

    fn notify(&self, callback: &'static str, f: impl FnOnce(&dyn EngineEvents)) {
        let events = &*self.shared.events;
        if panic::catch_unwind(AssertUnwindSafe(|| f(events))).is_err() {
            warn!(callback, "engine callback panicked, continuing");
        }
    }

    /// Indices of pieces in `Missing` state, ascending.
    pub fn missing_pieces(&self) -> Vec<usize> {
        let state = self.shared.state.lock();
        state
            .pieces
            .iter()
            .filter(|p| p.state == PieceState::Missing)
            .map(|p| p.index)
            .collect()
    }

    /// Uniform random choice among missing pieces.
    pub fn random_missing_piece(&self) -> Option<usize> {
        self.random_missing_piece_with(&mut rand::thread_rng())
    }

    pub fn random_missing_piece_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        self.missing_pieces().choose(rng).copied()
    }

    /// Assembled bytes of a piece verified in this session. Pieces that are not
    /// verified, or were restored from a snapshot and live only on disk, return None.
    pub fn piece_data(&self, index: usize) -> Option<Vec<u8>> {
        let state = self.shared.state.lock();
        let piece = state.pieces.get(index)?;
        (piece.state == PieceState::Verified && !piece.restored).then(|| piece.assemble())
    }

    pub fn piece_state(&self, index: usize) -> Option<PieceState> {
        self.shared.state.lock().pieces.get(index).map(Piece::state)
    }

    /// Fraction of pieces verified; 1.0 for an empty transfer.
    pub fn progress(&self) -> f64 {
        let state = self.shared.state.lock();
        if state.pieces.is_empty() {
            return 1.0;
        }
        state.verified.len() as f64 / state.pieces.len() as f64
    }

    pub fn is_download_complete(&self) -> bool {
        self.shared.state.lock().download_complete
    }

    /// Copy of the verified set, taken under the lock.
    pub fn verified_pieces(&self) -> BTreeSet<usize> {
        self.shared.state.lock().verified.clone()
    }

    /// Pieces with every block received whose hash has not been checked yet.
    pub fn completed_pieces(&self) -> BTreeSet<usize> {
        self.shared.state.lock().completed.clone()
    }

    /// Forces one piece back to `Missing`. Returns false for an out-of-range index.
    pub fn reset_piece(&self, index: usize) -> bool {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let Some(piece) = state.pieces.get_mut(index) else {
            return false;
        };
        piece.reset();
        state.completed.remove(&index);
        state.verified.remove(&index);
        state.download_complete = false;
        debug!(piece = index, "piece reset");
        true
    }

    /// Forces every piece back to `Missing` for a full re-check.
    pub fn reset_all(&self) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        for piece in &mut state.pieces {
            piece.reset();
        }
        state.completed.clear();
        state.verified.clear();
        state.download_complete = state.pieces.is_empty();
        info!(pieces = state.pieces.len(), "all pieces reset");
    }

    /// Marks pieces verified from restored resume state, skipping re-download
    /// and re-hashing. Out-of-range and already verified indices are ignored.
    /// Returns the number of pieces newly marked.
    pub fn seed_verified<I>(&self, indices: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        let (seeded, complete_event) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let mut seeded = 0;
            for index in indices {
                let Some(piece) = state.pieces.get_mut(index) else {
                    continue;
                };
                if piece.state == PieceState::Verified {
                    continue;
                }
                piece.mark_restored();
                state.completed.remove(&index);
                state.verified.insert(index);
                seeded += 1;
            }
            (seeded, Self::check_download_complete(state))
        };
        info!(seeded, "seeded verified pieces from resume state");
        if complete_event {
            info!(pieces = self.piece_count(), "download complete");
            self.notify("on_download_complete", |e| e.on_download_complete());
        }
        seeded
    }

    /// Blocks until no background verification is in flight.
    pub fn wait_for_verifications(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight > 0 {
            self.shared.idle.wait(&mut state);
        }
    }
}
