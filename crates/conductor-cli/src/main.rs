mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, memory::MemorySubcommand, prompt::PromptSubcommand,
    unit::UnitSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Drive units of work through phased, role-based agent execution",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .conductor/ or .git/)
    #[arg(long, global = true, env = "CONDUCTOR_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize conductor in the current project
    Init,

    /// Create, inspect and archive units of work
    Unit {
        #[command(subcommand)]
        subcommand: UnitSubcommand,
    },

    /// Approve the current phase of a unit
    Approve {
        unit: String,
        /// Who approved
        #[arg(long)]
        by: Option<String>,
    },

    /// Reject the current phase's work and redo it
    Reject {
        unit: String,
        #[arg(long)]
        reason: String,
    },

    /// Block a unit; blocked units neither run nor transition
    Block {
        unit: String,
        #[arg(long)]
        reason: String,
    },

    /// Lift a block
    Unblock { unit: String },

    /// Move a unit to its next phase if the gates allow
    Advance { unit: String },

    /// Run the current phase of a unit with its primary role
    Run {
        unit: String,

        /// Task handed to the primary role
        #[arg(long)]
        task: String,

        /// Replay responses from a file (one per line) instead of calling
        /// the configured reasoning command
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,
    },

    /// Inspect and compact a unit's memory
    Memory {
        #[command(subcommand)]
        subcommand: MemorySubcommand,
    },

    /// Show layered role instructions
    Prompt {
        #[command(subcommand)]
        subcommand: PromptSubcommand,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Unit { subcommand } => cmd::unit::run(&root, subcommand, cli.json),
        Commands::Approve { unit, by } => cmd::phase::approve(&root, &unit, by, cli.json),
        Commands::Reject { unit, reason } => cmd::phase::reject(&root, &unit, &reason, cli.json),
        Commands::Block { unit, reason } => cmd::phase::block(&root, &unit, &reason, cli.json),
        Commands::Unblock { unit } => cmd::phase::unblock(&root, &unit, cli.json),
        Commands::Advance { unit } => cmd::phase::advance(&root, &unit, cli.json),
        Commands::Run { unit, task, script } => {
            cmd::run::run(&root, &unit, &task, script.as_deref(), cli.json)
        }
        Commands::Memory { subcommand } => cmd::memory::run(&root, subcommand, cli.json),
        Commands::Prompt { subcommand } => cmd::prompt::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
