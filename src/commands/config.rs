use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }
    }
}

fn show(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;

    ui::header("Configuration");
    let path = ctx.config_path.display().to_string();
    if ctx.config_path.exists() {
        ui::kv("File", &path);
    } else {
        ui::kv("File", &format!("{path} (not found, using defaults)"));
    }
    ui::kv("Log directory", &config.log_dir().display().to_string());
    println!();

    // passwords live in the environment; only variable names are printed
    print!("{}", config.to_toml()?);

    println!();
    ui::dim("Override the location with --config or FLEETOPS_CONFIG.");
    Ok(())
}
