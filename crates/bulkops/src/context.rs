//! Progress hooks
//!
//! These let a caller drive a progress bar without the engine depending on
//! any terminal crate.

use crate::outcome::Outcome;
use crate::range::Id;

/// Receives progress updates from the engine.
///
/// Parallel runs call `on_unit_complete` from worker threads, hence `Sync`.
pub trait BulkProgress: Sync {
    /// Called once before a pass with the number of IDs it will visit.
    fn on_pass_start(&self, round: u32, ids: usize);

    /// Called after each ID has an outcome.
    fn on_unit_complete(&self, id: Id, outcome: &Outcome);

    /// Called after a pass has finished.
    fn on_pass_complete(&self, _round: u32) {}

    /// Called before waiting between retry rounds.
    fn on_retry_wait(&self, _next_round: u32, _pending: usize, _delay_secs: u64) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl BulkProgress for NoProgress {
    fn on_pass_start(&self, _round: u32, _ids: usize) {}
    fn on_unit_complete(&self, _id: Id, _outcome: &Outcome) {}
}
