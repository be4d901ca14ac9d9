//! Progress indicators for fleetops.
//!
//! [`BulkBar`] and [`TargetSpinner`] implement the library progress hooks so
//! the engine and dispatcher never touch the terminal themselves.

use bulkops::{BulkProgress, Id, Outcome};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use remotekit::{DispatchObserver, PerTargetResult, RemoteTarget, Stage, TargetStatus};
use std::cell::RefCell;
use std::time::Duration;

use crate::ui;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {prefix} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A spinner with a message
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_success(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::success(msg);
}

pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::error(msg);
}

pub fn finish_warn(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::warn(msg);
}

// ============================================================================
// Bulk runs
// ============================================================================

/// One bar, reset for every pass of a bulk run.
pub struct BulkBar {
    bar: ProgressBar,
    label: String,
}

impl BulkBar {
    pub fn new(label: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(bar_style());
        Self {
            bar,
            label: label.to_string(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BulkProgress for BulkBar {
    fn on_pass_start(&self, round: u32, ids: usize) {
        self.bar.reset();
        self.bar.set_length(ids as u64);
        let prefix = if round <= 1 {
            self.label.clone()
        } else {
            format!("{} (retry {})", self.label, round - 1)
        };
        self.bar.set_prefix(prefix);
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_unit_complete(&self, id: Id, outcome: &Outcome) {
        self.bar.set_message(format!("{id} {}", ui::glyph(outcome)));
        self.bar.inc(1);
    }

    fn on_retry_wait(&self, next_round: u32, pending: usize, delay_secs: u64) {
        self.bar.println(format!(
            "{} {pending} failed, retry {} in {delay_secs}s",
            "↻".yellow(),
            next_round - 1
        ));
    }
}

// ============================================================================
// Remote dispatch
// ============================================================================

/// One spinner per target, finished with its verdict.
pub struct TargetSpinner {
    quiet: bool,
    current: RefCell<Option<ProgressBar>>,
}

impl TargetSpinner {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            current: RefCell::new(None),
        }
    }
}

impl DispatchObserver for TargetSpinner {
    fn on_target_start(&self, target: &RemoteTarget, index: usize, total: usize) {
        let pb = if self.quiet {
            ProgressBar::hidden()
        } else {
            spinner("connecting")
        };
        pb.set_prefix(format!(
            "{} {}",
            format!("[{}/{total}]", index + 1).blue().bold(),
            target.name
        ));
        *self.current.borrow_mut() = Some(pb);
    }

    fn on_stage(&self, _target: &RemoteTarget, stage: Stage) {
        if let Some(pb) = self.current.borrow().as_ref() {
            pb.set_message(stage.to_string());
        }
    }

    fn on_target_complete(&self, result: &PerTargetResult) {
        let Some(pb) = self.current.borrow_mut().take() else {
            return;
        };
        if self.quiet {
            pb.finish_and_clear();
            return;
        }

        let name = &result.target;
        match &result.status {
            TargetStatus::Completed if result.success => {
                finish_success(&pb, &format!("{name}: exit 0"));
            }
            TargetStatus::Completed => {
                let code = result
                    .exit_code
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string());
                finish_error(&pb, &format!("{name}: ran and failed (exit {code})"));
            }
            TargetStatus::Unreachable { message } => {
                finish_error(
                    &pb,
                    &format!("{name}: could not reach target ({})", ui::truncate(message, 60)),
                );
            }
            TargetStatus::Failed { stage, message } => {
                finish_error(
                    &pb,
                    &format!("{name}: {stage} failed ({})", ui::truncate(message, 60)),
                );
            }
            TargetStatus::NotAttempted { stage } => {
                let at = stage.map_or_else(String::new, |s| format!(" while {s}"));
                finish_warn(&pb, &format!("{name}: interrupted{at}"));
            }
        }
    }
}
