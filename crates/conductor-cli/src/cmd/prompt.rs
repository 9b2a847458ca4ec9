use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use conductor_core::{config::Config, prompt::PromptStack};
use std::path::Path;

#[derive(Subcommand)]
pub enum PromptSubcommand {
    /// Print the effective instruction a role receives
    Show { role: String },
}

pub fn run(root: &Path, subcmd: PromptSubcommand, json: bool) -> anyhow::Result<()> {
    let PromptSubcommand::Show { role } = subcmd;
    let config = Config::load(root).context("failed to load config")?;
    config.role(&role)?;
    let stack = PromptStack::load(root).context("failed to read prompt layers")?;
    let effective = stack.resolve(&role);

    if json {
        return print_json(&effective);
    }
    println!("# layers: {}", effective.layers.join(", "));
    println!("{}", effective.body);
    Ok(())
}
