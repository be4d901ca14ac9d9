use anyhow::{Context as AnyhowContext, Result};
use bulkops::{BulkEngine, BulkSavedState, Filtered, Id, IdRange, RunResult, StateFilter};
use colored::Colorize;
use remotekit::SshTransport;

use crate::Context;
use crate::cli::BulkArgs;
use crate::guest::{self, GuestAction, GuestKind, GuestOperation, Inventory};
use crate::progress::BulkBar;
use crate::ui;

/// How the engine walks the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Retry(u32),
    Parallel(usize),
}

impl Mode {
    pub fn select(parallel: bool, jobs: Option<usize>, retries: u32, default_jobs: usize) -> Self {
        match jobs {
            Some(jobs) => Self::Parallel(jobs.max(1)),
            None if parallel => Self::Parallel(default_jobs.max(1)),
            None if retries > 0 => Self::Retry(retries),
            None => Self::Sequential,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Sequential => "sequential".to_string(),
            Self::Retry(n) => format!("sequential, {n} retries"),
            Self::Parallel(jobs) => format!("parallel, {jobs} workers"),
        }
    }
}

pub fn run(ctx: &Context, args: BulkArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let kind = GuestKind::from(args.kind);
    let action = GuestAction::from_args(args.action, &args.options)?;
    let range = IdRange::new(args.start, args.end);

    let engine_options = config.bulk_options();
    range
        .validate(engine_options.max_span)
        .context("Invalid ID range")?;

    let mode = Mode::select(args.parallel, args.jobs, args.retries, config.jobs);
    let filter = StateFilter {
        skip_stopped: args.skip_stopped,
        skip_running: args.skip_running,
    };

    ui::header(&format!("Bulk {action}: {}s {range}", kind.label()));
    ui::kv("IDs", &range.span().to_string());
    ui::kv("Mode", &mode.describe());
    if filter.skip_stopped {
        ui::kv("Filter", "skip stopped");
    } else if filter.skip_running {
        ui::kv("Filter", "skip running");
    }

    if action.is_destructive() {
        let prompt = format!(
            "{} up to {} {}s ({range})?",
            action.verb(),
            range.span(),
            kind.label()
        );
        if !super::confirm(&prompt, args.yes)? {
            ui::warn("Aborted. No changes made.");
            return Ok(());
        }
    }

    let inventory = Inventory::load(kind)?;
    log::debug!("Cluster has {} {}s", inventory.len(), kind.label());
    if inventory.is_empty() {
        ui::warn(&format!("No {}s found in the cluster", kind.label()));
    }
    let in_range = range.ids().filter(|&id| inventory.get(id).is_some()).count();
    ui::kv("Found", &format!("{in_range} of {}", range.span()));
    println!();

    let transport = SshTransport::new().with_connect_timeout(config.connect_timeout());
    let local_node = guest::local_node();
    let op = GuestOperation::new(&action, &inventory, &config, &local_node, &transport);
    let filtered = Filtered::new(&op, &inventory, filter);

    let bar = BulkBar::new(action.verb(), ctx.quiet);
    let engine = BulkEngine::new(engine_options).with_progress(&bar);

    let mut rounds = Vec::new();
    let result = match mode {
        Mode::Sequential => engine.run(range, &filtered)?,
        Mode::Parallel(jobs) => engine.run_parallel(jobs, range, &filtered)?,
        Mode::Retry(retries) => {
            let run = engine.run_with_retry(retries, range, &filtered)?;
            rounds = run.rounds;
            run.result
        }
    };
    bar.finish();

    if rounds.len() > 1 && !ctx.quiet {
        print_rounds(&rounds);
    }

    super::print_result(&result, args.report);

    if let Some(format) = args.export {
        let stem = format!(
            "fleetops-{}-{}-{}-{}",
            kind.tool(),
            action.verb(),
            range.start,
            range.end
        );
        super::export_result(&result, format, args.output.as_deref(), &stem)?;
    }

    if let Some(path) = &args.save_state {
        save_state(&result, path)?;
    }

    if result.failed() > 0 {
        anyhow::bail!(
            "{} of {} {}s failed to {}",
            result.failed(),
            result.total(),
            kind.label(),
            action.verb()
        );
    }
    Ok(())
}

fn print_rounds(rounds: &[RunResult<Id>]) {
    ui::section("Rounds");
    for (index, round) in rounds.iter().enumerate() {
        let failed = round.failed_keys();
        let line = format!(
            "{:>2}: {} attempted, {} succeeded, {} failed",
            index + 1,
            round.total(),
            round.succeeded(),
            failed.len()
        );
        if failed.is_empty() {
            println!("  {line}");
        } else {
            println!("  {line} {}", format!("({})", ui::compact_ids(&failed)).dimmed());
        }
    }
}

fn save_state(result: &RunResult<Id>, path: &std::path::Path) -> Result<()> {
    BulkSavedState::from_result(result)
        .save(path)
        .with_context(|| format!("Failed to save state to {}", path.display()))?;
    ui::dim(&format!("State saved to {}", path.display()));
    Ok(())
}
