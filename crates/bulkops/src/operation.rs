//! Units of work and the existence/state filter decorator.

use crate::outcome::{Outcome, SkipReason};
use crate::range::{Id, IdRange};
use std::fmt;

/// A unit of work applied to one ID.
///
/// Any closure `Fn(Id) -> Result<(), E>` is an operation; extra arguments are
/// captured by the closure. `Sync` is required so the same operation can be
/// shared by parallel workers.
pub trait Operation: Sync {
    /// Apply the unit of work to `id`.
    fn apply(&self, id: Id) -> Outcome;
}

impl<F, E> Operation for F
where
    F: Fn(Id) -> Result<(), E> + Sync,
    E: fmt::Display,
{
    fn apply(&self, id: Id) -> Outcome {
        match self(id) {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}

/// Resource-state primitives supplied by the caller.
pub trait StateProbe: Sync {
    /// Whether a resource with this ID exists.
    fn exists(&self, id: Id) -> bool;

    /// Whether the resource is currently running.
    fn is_running(&self, id: Id) -> bool;
}

/// Which running states cause an ID to be skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFilter {
    pub skip_stopped: bool,
    pub skip_running: bool,
}

impl StateFilter {
    /// No state filtering, only the existence check.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn skip_stopped() -> Self {
        Self {
            skip_stopped: true,
            skip_running: false,
        }
    }

    pub fn skip_running() -> Self {
        Self {
            skip_stopped: false,
            skip_running: true,
        }
    }

    /// Whether the running-state probe needs to be consulted at all.
    pub fn is_active(&self) -> bool {
        self.skip_stopped || self.skip_running
    }
}

/// Wraps an operation so missing or filtered-out IDs are skipped.
///
/// The existence probe runs first; the running-state probe only runs when a
/// state filter is active. The wrapped operation is never invoked for a
/// skipped ID.
pub struct Filtered<'a, O: ?Sized, P: ?Sized> {
    inner: &'a O,
    probe: &'a P,
    filter: StateFilter,
}

impl<'a, O: Operation + ?Sized, P: StateProbe + ?Sized> Filtered<'a, O, P> {
    pub fn new(inner: &'a O, probe: &'a P, filter: StateFilter) -> Self {
        Self {
            inner,
            probe,
            filter,
        }
    }

    /// The skip reason for `id`, or `None` if it should be processed.
    pub fn skip_reason(&self, id: Id) -> Option<SkipReason> {
        if !self.probe.exists(id) {
            return Some(SkipReason::NotFound);
        }

        if self.filter.is_active() {
            let running = self.probe.is_running(id);
            if running && self.filter.skip_running {
                return Some(SkipReason::Running);
            }
            if !running && self.filter.skip_stopped {
                return Some(SkipReason::Stopped);
            }
        }

        None
    }
}

impl<O: Operation + ?Sized, P: StateProbe + ?Sized> Operation for Filtered<'_, O, P> {
    fn apply(&self, id: Id) -> Outcome {
        match self.skip_reason(id) {
            Some(reason) => {
                log::debug!("Skipping {id}: {reason}");
                Outcome::skipped(reason)
            }
            None => self.inner.apply(id),
        }
    }
}

/// IDs in `range` for which `predicate` holds, in ascending order.
pub fn filter(range: IdRange, predicate: impl Fn(Id) -> bool) -> Vec<Id> {
    range.ids().filter(|&id| predicate(id)).collect()
}
