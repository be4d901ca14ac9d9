use anyhow::{Context as AnyhowContext, Result};
use bulkops::BulkSavedState;
use std::path::Path;

use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(_ctx: &Context, cmd: StateCommand) -> Result<()> {
    match cmd {
        StateCommand::Show { file, json } => show(&file, json),
    }
}

fn show(path: &Path, json: bool) -> Result<()> {
    let state = BulkSavedState::load(path)
        .with_context(|| format!("Could not load state from {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    ui::header(&format!("Saved run: {}", path.display()));
    for (key, value) in describe(&state) {
        ui::kv(key, &value);
    }

    println!();
    ui::dim("Snapshots are for inspection only; re-run the bulk command to retry.");
    Ok(())
}

fn describe(state: &BulkSavedState) -> Vec<(&'static str, String)> {
    let unaccounted = state.total.saturating_sub(state.counters().processed());
    let mut rows = vec![
        (
            "Saved",
            state.saved_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("Total", state.total.to_string()),
        ("Succeeded", state.succeeded.to_string()),
        ("Failed", state.failed.to_string()),
        ("Skipped", state.skipped.to_string()),
    ];
    if unaccounted > 0 {
        rows.push(("Unaccounted", unaccounted.to_string()));
    }
    rows.push(("Succeeded IDs", ui::compact_ids(&state.success_ids)));
    rows.push(("Failed IDs", ui::compact_ids(&state.failed_ids)));
    rows
}
