mod cli;
mod commands;
mod config;
mod guest;
mod progress;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::FleetConfig;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl Context {
    pub fn load_config(&self) -> Result<FleetConfig> {
        FleetConfig::load(&self.config_path)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config_path: config::config_path(cli.config.as_deref())?,
    };
    log::debug!("Using config {}", ctx.config_path.display());

    match cli.command {
        Command::Bulk(args) => commands::bulk::run(&ctx, args),
        Command::Filter(args) => commands::filter::run(&ctx, args),
        Command::Exec(args) => commands::exec::run(&ctx, args),
        Command::State(cmd) => commands::state::run(&ctx, cmd),
        Command::Nodes => commands::nodes::run(&ctx),
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "fleetops", &mut io::stdout());
            Ok(())
        }
    }
}
