//! Per-unit outcomes, run counters and the aggregated run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Why a unit was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// The resource does not exist
    #[serde(rename = "not found")]
    NotFound,
    /// The resource is stopped and stopped resources are being skipped
    #[serde(rename = "stopped")]
    Stopped,
    /// The resource is running and running resources are being skipped
    #[serde(rename = "running")]
    Running,
    /// The run was interrupted before this unit started
    #[serde(rename = "not attempted")]
    NotAttempted,
}

impl SkipReason {
    /// Reason string as it appears in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::NotAttempted => "not attempted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// The unit succeeded
    Success,
    /// The unit failed, optionally with a message
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The unit was not attempted
    Skipped { reason: SkipReason },
}

impl Outcome {
    /// A failure carrying a message.
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::Failure {
            detail: Some(detail.into()),
        }
    }

    /// A failure without further detail.
    pub fn failed() -> Self {
        Self::Failure { detail: None }
    }

    /// A skip with the given reason.
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Outcome tag: `success`, `failure`, or the skip reason.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure { .. } => "failure",
            Self::Skipped { reason } => reason.as_str(),
        }
    }

    /// Failure message, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Failure { detail } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok { Self::Success } else { Self::failed() }
    }
}

/// Run counters. `total` is fixed when the run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounters {
    /// Counters for a run of `total` units, nothing processed yet.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Count one outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Number of units with an outcome so far.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Whether every unit has an outcome.
    pub fn is_complete(&self) -> bool {
        self.processed() == self.total
    }

    /// Whether the run had no failures.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Outcomes keyed by ID or target name, in the order they were recorded.
///
/// Entries are write-once: recording the same key twice keeps the first.
#[derive(Debug, Clone)]
pub struct OutcomeMap<K> {
    entries: Vec<(K, Outcome)>,
    index: HashMap<K, usize>,
}

// The index is derived from the entries.
impl<K: PartialEq> PartialEq for OutcomeMap<K> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq> Eq for OutcomeMap<K> {}

impl<K> Default for OutcomeMap<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> OutcomeMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. Returns `false` if `key` already has one.
    pub fn insert(&mut self, key: K, outcome: Outcome) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, outcome));
        true
    }

    pub fn get(&self, key: &K) -> Option<&Outcome> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Outcome)> {
        self.entries.iter().map(|(k, o)| (k, o))
    }

    /// Keys whose outcome matches `pred`, in recording order.
    pub fn keys_where(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Counters plus per-unit outcomes for one run.
#[derive(Debug, Clone)]
pub struct RunResult<K> {
    pub counters: RunCounters,
    pub outcomes: OutcomeMap<K>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl<K: Clone + Eq + Hash> RunResult<K> {
    pub fn total(&self) -> usize {
        self.counters.total
    }

    pub fn succeeded(&self) -> usize {
        self.counters.succeeded
    }

    pub fn failed(&self) -> usize {
        self.counters.failed
    }

    pub fn skipped(&self) -> usize {
        self.counters.skipped
    }

    /// Whether the run had no failures.
    pub fn is_success(&self) -> bool {
        self.counters.is_success()
    }

    /// Keys that succeeded, in recording order.
    pub fn succeeded_keys(&self) -> Vec<K> {
        self.outcomes.keys_where(Outcome::is_success)
    }

    /// Keys that failed, in recording order.
    pub fn failed_keys(&self) -> Vec<K> {
        self.outcomes.keys_where(Outcome::is_failure)
    }

    /// Keys that were skipped, in recording order.
    pub fn skipped_keys(&self) -> Vec<K> {
        self.outcomes.keys_where(Outcome::is_skipped)
    }
}

/// Accumulates outcomes while a run is in progress.
#[derive(Debug)]
pub struct RunRecorder<K> {
    counters: RunCounters,
    outcomes: OutcomeMap<K>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl<K: Clone + Eq + Hash + fmt::Display> RunRecorder<K> {
    /// Start a run of `total` units.
    pub fn start(total: usize) -> Self {
        Self {
            counters: RunCounters::new(total),
            outcomes: OutcomeMap::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Record the outcome for `key`. A second outcome for the same key is ignored.
    pub fn record(&mut self, key: K, outcome: Outcome) {
        if self.outcomes.contains(&key) {
            log::warn!("Ignoring duplicate outcome for {key}");
            return;
        }
        if self.counters.processed() >= self.counters.total {
            log::warn!(
                "Ignoring outcome for {key}: all {} units already counted",
                self.counters.total
            );
            return;
        }
        self.counters.record(&outcome);
        self.outcomes.insert(key, outcome);
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Close the run and stamp its duration.
    pub fn finish(self) -> RunResult<K> {
        RunResult {
            counters: self.counters,
            outcomes: self.outcomes,
            started_at: self.started_at,
            elapsed: self.clock.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_tags() {
        assert_eq!(Outcome::Success.tag(), "success");
        assert_eq!(Outcome::failure("boom").tag(), "failure");
        assert_eq!(Outcome::skipped(SkipReason::NotFound).tag(), "not found");
        assert_eq!(Outcome::skipped(SkipReason::Running).tag(), "running");
        assert_eq!(Outcome::failure("boom").detail(), Some("boom"));
        assert_eq!(Outcome::Success.detail(), None);
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(Outcome::from(true), Outcome::Success);
        assert!(Outcome::from(false).is_failure());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::skipped(SkipReason::NotFound)).unwrap();
        assert_eq!(json, r#"{"status":"skipped","reason":"not found"}"#);

        let json = serde_json::to_string(&Outcome::failed()).unwrap();
        assert_eq!(json, r#"{"status":"failure"}"#);
    }

    #[test]
    fn test_outcome_map_is_write_once() {
        let mut map = OutcomeMap::new();
        assert!(map.insert(101, Outcome::failed()));
        assert!(!map.insert(101, Outcome::Success));
        assert_eq!(map.len(), 1);
        assert!(map.get(&101).unwrap().is_failure());
    }

    #[test]
    fn test_outcome_map_keeps_insertion_order() {
        let mut map = OutcomeMap::new();
        map.insert("pve3".to_string(), Outcome::Success);
        map.insert("pve1".to_string(), Outcome::failed());
        map.insert("pve2".to_string(), Outcome::Success);

        let keys: Vec<_> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["pve3", "pve1", "pve2"]);
        assert_eq!(map.keys_where(Outcome::is_success), vec!["pve3", "pve2"]);
    }

    #[test]
    fn test_outcome_map_equality_follows_entries() {
        let mut a = OutcomeMap::new();
        a.insert(100, Outcome::Success);
        a.insert(101, Outcome::failure("locked"));

        let mut b = OutcomeMap::new();
        b.insert(100, Outcome::Success);
        b.insert(101, Outcome::failure("locked"));
        assert_eq!(a, b);

        let mut reordered = OutcomeMap::new();
        reordered.insert(101, Outcome::failure("locked"));
        reordered.insert(100, Outcome::Success);
        assert_ne!(a, reordered);
    }

    #[test]
    fn test_recorder_counts() {
        let mut recorder = RunRecorder::start(4);
        recorder.record(100, Outcome::Success);
        recorder.record(101, Outcome::failed());
        recorder.record(102, Outcome::skipped(SkipReason::Stopped));
        recorder.record(102, Outcome::Success);

        let result = recorder.finish();
        assert_eq!(result.total(), 4);
        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.skipped(), 1);
        assert!(!result.counters.is_complete());
        assert_eq!(result.failed_keys(), vec![101]);
    }

    #[test]
    fn test_recorder_never_exceeds_total() {
        let mut recorder = RunRecorder::start(1);
        recorder.record(1, Outcome::Success);
        recorder.record(2, Outcome::Success);

        let result = recorder.finish();
        assert_eq!(result.counters.processed(), 1);
        assert!(result.counters.is_complete());
    }
}
