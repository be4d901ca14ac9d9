// Guest range operations
pub mod bulk;
pub mod filter;

// Remote script execution
pub mod exec;

// Inspection
pub mod config;
pub mod nodes;
pub mod state;

use anyhow::{Context, Result};
use bulkops::report::{self, ReportFormat};
use bulkops::RunResult;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::cli::ExportFormatArg;
use crate::ui;

impl From<ExportFormatArg> for ReportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Json => Self::Json,
            ExportFormatArg::Csv => Self::Csv,
        }
    }
}

/// Summary line, colored by verdict, plus failed and skipped entries when
/// `detailed` is set.
pub(crate) fn print_result<K>(result: &RunResult<K>, detailed: bool)
where
    K: Clone + Eq + Hash + Display,
{
    println!();
    let summary = report::summary(result);
    if result.failed() > 0 {
        ui::error(&summary);
    } else if result.skipped() > 0 {
        ui::warn(&summary);
    } else {
        ui::success(&summary);
    }

    if detailed {
        let details = report::detailed(result);
        if !details.is_empty() {
            println!();
            print!("{details}");
        }
    }
}

/// Write a machine-readable report; returns where it went.
pub(crate) fn export_result<K>(
    result: &RunResult<K>,
    format: ExportFormatArg,
    output: Option<&Path>,
    default_stem: &str,
) -> Result<PathBuf>
where
    K: Clone + Eq + Hash + Display + Serialize,
{
    let format = ReportFormat::from(format);
    let path = output.map_or_else(
        || PathBuf::from(format!("{default_stem}.{}", format.extension())),
        Path::to_path_buf,
    );
    report::write_report(result, format, &path)
        .with_context(|| format!("Failed to export report to {}", path.display()))?;
    ui::success(&format!("Report written to {}", path.display()));
    Ok(path)
}

/// Ask before doing something that cannot be undone.
pub(crate) fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}
