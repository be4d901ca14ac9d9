use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::config::NodeConfig;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;

    ui::header("Nodes");
    if config.nodes.is_empty() {
        ui::dim(&format!(
            "No nodes configured. Add [[nodes]] entries to {}",
            ctx.config_path.display()
        ));
        return Ok(());
    }

    for node in &config.nodes {
        println!("  {:<16} {}", node.name.bold(), endpoint(node));
        ui::dim(&format!("  auth: {}", node.auth_label()));
    }
    Ok(())
}

fn endpoint(node: &NodeConfig) -> String {
    if node.port == 22 {
        format!("{}@{}", node.username, node.address)
    } else {
        format!("{}@{}:{}", node.username, node.address, node.port)
    }
}
