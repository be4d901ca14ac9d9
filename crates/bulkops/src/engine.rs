//! Bulk operation engine - applies an operation across an ID range

use crate::context::{BulkProgress, NoProgress};
use crate::error::{Error, Result};
use crate::operation::{Filtered, Operation, StateFilter, StateProbe};
use crate::outcome::{Outcome, OutcomeMap, RunCounters, RunRecorder, RunResult};
use crate::parallel::{SlotTable, isolated};
use crate::range::{DEFAULT_MAX_SPAN, Id, IdRange};
use chrono::Utc;
use rayon::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

/// Fixed pause between retry rounds.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Engine settings
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Largest range the engine will accept
    pub max_span: u64,
    /// Pause between retry rounds
    pub retry_delay: Duration,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            max_span: DEFAULT_MAX_SPAN,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Result of a run with retries.
///
/// Every round keeps its own, untouched result. `result` is the merged view:
/// each ID carries the outcome of the last round that attempted it.
#[derive(Debug, Clone)]
pub struct RetryRun {
    pub rounds: Vec<RunResult<Id>>,
    pub result: RunResult<Id>,
}

impl RetryRun {
    /// IDs attempted in `round` (1-based).
    pub fn attempted(&self, round: usize) -> Vec<Id> {
        round
            .checked_sub(1)
            .and_then(|i| self.rounds.get(i))
            .map(|r| r.outcomes.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }
}

/// Applies operations across validated ID ranges.
pub struct BulkEngine<'p> {
    options: BulkOptions,
    progress: &'p dyn BulkProgress,
}

impl BulkEngine<'static> {
    /// Engine with no progress reporting.
    pub fn new(options: BulkOptions) -> Self {
        Self {
            options,
            progress: &NoProgress,
        }
    }
}

impl<'p> BulkEngine<'p> {
    /// Attach a progress sink.
    pub fn with_progress<'q>(self, progress: &'q dyn BulkProgress) -> BulkEngine<'q> {
        BulkEngine {
            options: self.options,
            progress,
        }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Validate `range` against the configured maximum span.
    pub fn validate(&self, range: IdRange) -> Result<()> {
        range.validate(self.options.max_span)
    }

    /// Apply `op` to every ID in `range`, in ascending order.
    ///
    /// No filtering happens here; wrap the operation in [`Filtered`] or use
    /// [`BulkEngine::run_filtered`] for that.
    pub fn run<O: Operation + ?Sized>(&self, range: IdRange, op: &O) -> Result<RunResult<Id>> {
        self.validate(range)?;
        let ids: Vec<Id> = range.ids().collect();
        Ok(self.pass(1, &ids, op))
    }

    /// Like [`BulkEngine::run`], but IDs that do not exist or fail the state
    /// filter are skipped without invoking `op`.
    pub fn run_filtered<O, P>(
        &self,
        range: IdRange,
        probe: &P,
        filter: StateFilter,
        op: &O,
    ) -> Result<RunResult<Id>>
    where
        O: Operation + ?Sized,
        P: StateProbe + ?Sized,
    {
        self.run(range, &Filtered::new(op, probe, filter))
    }

    /// One full pass, then up to `max_retries` passes over the IDs that
    /// failed in the previous pass.
    pub fn run_with_retry<O: Operation + ?Sized>(
        &self,
        max_retries: u32,
        range: IdRange,
        op: &O,
    ) -> Result<RetryRun> {
        self.validate(range)?;
        let started_at = Utc::now();
        let clock = Instant::now();

        let ids: Vec<Id> = range.ids().collect();
        let first = self.pass(1, &ids, op);
        let mut pending = first.failed_keys();
        let mut rounds = vec![first];

        let mut retries = 0;
        while !pending.is_empty() && retries < max_retries {
            retries += 1;
            let round = retries + 1;
            let delay = self.options.retry_delay;

            log::info!(
                "Retrying {} failed IDs (round {round}/{}) in {}s",
                pending.len(),
                max_retries + 1,
                delay.as_secs()
            );
            self.progress
                .on_retry_wait(round, pending.len(), delay.as_secs());
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            let result = self.pass(round, &pending, op);
            pending = result.failed_keys();
            rounds.push(result);
        }

        let mut counters = RunCounters::new(ids.len());
        let mut outcomes = OutcomeMap::new();
        for id in ids {
            let latest = rounds.iter().rev().find_map(|r| r.outcomes.get(&id));
            if let Some(outcome) = latest {
                counters.record(outcome);
                outcomes.insert(id, outcome.clone());
            }
        }

        Ok(RetryRun {
            rounds,
            result: RunResult {
                counters,
                outcomes,
                started_at,
                elapsed: clock.elapsed(),
            },
        })
    }

    /// Apply `op` with up to `max_concurrency` workers.
    ///
    /// Completion order is unspecified; outcomes are joined back in range
    /// order once every worker has finished.
    pub fn run_parallel<O: Operation + ?Sized>(
        &self,
        max_concurrency: usize,
        range: IdRange,
        op: &O,
    ) -> Result<RunResult<Id>> {
        self.validate(range)?;
        let ids: Vec<Id> = range.ids().collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrency.max(1))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let mut recorder = RunRecorder::start(ids.len());
        self.progress.on_pass_start(1, ids.len());

        let slots = SlotTable::new(ids.len());
        let progress = self.progress;
        pool.install(|| {
            ids.par_iter().enumerate().for_each(|(index, &id)| {
                let outcome = isolated(op, id);
                log::debug!("{id}: {}", outcome.tag());
                progress.on_unit_complete(id, &outcome);
                slots.fill(index, id, outcome);
            });
        });

        for (&id, outcome) in ids.iter().zip(slots.into_outcomes()) {
            let outcome = outcome.unwrap_or_else(|| {
                log::error!("No outcome recorded for {id}");
                Outcome::failure("worker produced no outcome")
            });
            recorder.record(id, outcome);
        }

        self.progress.on_pass_complete(1);
        Ok(recorder.finish())
    }

    /// Sequential pass over `ids`.
    fn pass<O: Operation + ?Sized>(&self, round: u32, ids: &[Id], op: &O) -> RunResult<Id> {
        self.progress.on_pass_start(round, ids.len());
        let mut recorder = RunRecorder::start(ids.len());

        for &id in ids {
            let outcome = op.apply(id);
            match outcome.detail() {
                Some(detail) => log::debug!("{id}: {} ({detail})", outcome.tag()),
                None => log::debug!("{id}: {}", outcome.tag()),
            }
            self.progress.on_unit_complete(id, &outcome);
            recorder.record(id, outcome);
        }

        self.progress.on_pass_complete(round);
        recorder.finish()
    }
}
