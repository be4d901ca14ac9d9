use anyhow::{Context as AnyhowContext, Result};
use bulkops::{Id, IdRange, StateProbe};
use colored::Colorize;

use crate::Context;
use crate::cli::{FilterArgs, StateArg};
use crate::guest::{GuestKind, Inventory};
use crate::ui;

pub fn run(ctx: &Context, args: FilterArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let kind = GuestKind::from(args.kind);
    let range = IdRange::new(args.start, args.end);
    range
        .validate(config.max_span)
        .context("Invalid ID range")?;

    let inventory = Inventory::load(kind)?;
    let ids = select(&inventory, range, args.state);

    // bare IDs for piping
    if ctx.quiet {
        for id in &ids {
            println!("{id}");
        }
        return Ok(());
    }

    ui::header(&format!("{}s {range} ({})", kind.label(), state_label(args.state)));
    if ids.is_empty() {
        ui::dim("No matches");
        return Ok(());
    }

    for &id in &ids {
        let Some(guest) = inventory.get(id) else {
            continue;
        };
        let state = if guest.running {
            format!("{:<8}", "running").green()
        } else {
            format!("{:<8}", "stopped").yellow()
        };
        println!(
            "  {:>6}  {}  {:<12}  {}",
            id,
            state,
            guest.node,
            guest.name.as_deref().unwrap_or("").dimmed()
        );
    }

    println!();
    ui::info(&format!("{} matched: {}", ids.len(), ui::compact_ids(&ids)));
    Ok(())
}

/// Existing IDs in `range` whose state matches.
fn select<P: StateProbe>(probe: &P, range: IdRange, state: StateArg) -> Vec<Id> {
    bulkops::filter(range, |id| {
        probe.exists(id)
            && match state {
                StateArg::Running => probe.is_running(id),
                StateArg::Stopped => !probe.is_running(id),
                StateArg::Any => true,
            }
    })
}

fn state_label(state: StateArg) -> &'static str {
    match state {
        StateArg::Running => "running",
        StateArg::Stopped => "stopped",
        StateArg::Any => "any state",
    }
}
