//! Fan-out/join support for parallel runs.
//!
//! Workers never touch the run counters. Each one owns exactly one slot,
//! keyed by the ID's position in the range, and the parent reads every slot
//! back in range order once the pool has drained.

use crate::operation::Operation;
use crate::outcome::Outcome;
use crate::range::Id;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

/// One write-once slot per ID.
pub(crate) struct SlotTable {
    slots: Vec<OnceLock<Outcome>>,
}

impl SlotTable {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Store the outcome for slot `index`. A second write is dropped.
    pub(crate) fn fill(&self, index: usize, id: Id, outcome: Outcome) {
        match self.slots.get(index) {
            Some(slot) => {
                if slot.set(outcome).is_err() {
                    log::warn!("Slot for {id} written twice, keeping the first outcome");
                }
            }
            None => log::warn!("No slot {index} for {id}"),
        }
    }

    /// Drain the slots in index order. Empty slots yield `None`.
    pub(crate) fn into_outcomes(self) -> impl Iterator<Item = Option<Outcome>> {
        self.slots.into_iter().map(OnceLock::into_inner)
    }
}

/// Run `op` for `id`, turning a panic into a failure for that ID only.
pub(crate) fn isolated<O: Operation + ?Sized>(op: &O, id: Id) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| op.apply(id))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Worker for {id} panicked: {message}");
            Outcome::failure(format!("worker panicked: {message}"))
        }
    }
}
