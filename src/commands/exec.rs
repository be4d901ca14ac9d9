use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use remotekit::{
    DispatchRun, Dispatcher, InterruptToken, Payload, PerTargetResult, RemoteTarget, SshTransport,
    TargetStatus,
};

use crate::Context;
use crate::cli::ExecArgs;
use crate::config::FleetConfig;
use crate::progress::TargetSpinner;
use crate::runner;
use crate::ui;

pub fn run(ctx: &Context, args: ExecArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let targets = select_targets(&config, &args)?;

    if targets.iter().any(|t| t.credential.is_password()) && !runner::command_exists("sshpass") {
        anyhow::bail!("sshpass is required for nodes configured with password_env");
    }

    let payload = build_payload(&config, &args);
    let options = config.dispatch_options();

    ui::header(&format!("Running {}", args.script.display()));
    ui::kv(
        "Nodes",
        &targets
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    if !args.args.is_empty() {
        ui::kv("Arguments", &args.args.join(" "));
    }
    if !payload.support.is_empty() {
        ui::kv("Support files", &payload.support.len().to_string());
    }
    ui::kv("Run", &options.run_id);
    ui::kv("Logs", &options.run_log_dir().display().to_string());
    println!();

    remotekit::install_signal_handlers().context("Failed to install signal handlers")?;
    let interrupt = InterruptToken::for_run();

    let transport = SshTransport::new().with_connect_timeout(config.connect_timeout());
    let spinner = TargetSpinner::new(ctx.quiet);
    let dispatcher = Dispatcher::new(&transport, options, interrupt).with_observer(&spinner);

    let run = dispatcher.execute_on_targets(&targets, &payload, &args.args)?;

    if !ctx.quiet {
        print_targets(&run, ctx.verbose > 0);
    }
    super::print_result(&run.summary, args.report);

    if let Some(format) = args.export {
        let stem = format!("fleetops-exec-{}", run.run_id);
        super::export_result(&run.summary, format, args.output.as_deref(), &stem)?;
    }

    if run.interrupted {
        ui::warn("Interrupted: nodes not yet started were skipped");
        anyhow::bail!("Run {} was interrupted", run.run_id);
    }
    if !run.is_success() {
        anyhow::bail!(
            "{} of {} nodes failed",
            run.summary.failed(),
            run.summary.total()
        );
    }
    Ok(())
}

fn select_targets(config: &FleetConfig, args: &ExecArgs) -> Result<Vec<RemoteTarget>> {
    let targets = if args.all {
        config.all_targets()?
    } else {
        config.resolve_targets(&args.nodes)?
    };

    if targets.is_empty() {
        anyhow::bail!("No nodes configured; add [[nodes]] entries to the config file");
    }
    Ok(targets)
}

/// Configured support files first, then the ones given on the command line.
fn build_payload(config: &FleetConfig, args: &ExecArgs) -> Payload {
    config
        .support_paths()
        .into_iter()
        .chain(args.support.iter().cloned())
        .fold(Payload::new(&args.script), Payload::with_support)
}

fn print_targets(run: &DispatchRun, show_debug_logs: bool) {
    ui::section("Nodes");
    for result in &run.targets {
        println!("  {} {:<16} {}", marker(result), result.target, verdict(result));
        if let Some(log) = &result.log_path {
            ui::dim(&format!("    log: {}", log.display()));
        }
        if show_debug_logs && let Some(log) = &result.debug_log_path {
            ui::dim(&format!("    debug log: {}", log.display()));
        }
    }
}

fn marker(result: &PerTargetResult) -> String {
    match result.status {
        _ if result.success => "✓".green().to_string(),
        TargetStatus::NotAttempted { .. } => "–".yellow().to_string(),
        _ => "✗".red().to_string(),
    }
}

fn verdict(result: &PerTargetResult) -> String {
    match &result.status {
        TargetStatus::Completed => {
            let code = result
                .exit_code
                .map_or_else(|| "?".to_string(), |c| c.to_string());
            if result.exit_verified {
                format!("exit {code}")
            } else {
                format!("exit {code} {}", "(unverified)".dimmed())
            }
        }
        TargetStatus::Unreachable { message } => {
            format!("could not reach target: {}", ui::truncate(message, 60))
        }
        TargetStatus::Failed { stage, message } => {
            format!("{stage} failed: {}", ui::truncate(message, 60))
        }
        TargetStatus::NotAttempted { stage: None } => "not attempted".to_string(),
        TargetStatus::NotAttempted { stage: Some(stage) } => {
            format!("interrupted while {stage}")
        }
    }
}
