use crate::output::print_json;
use anyhow::Context;
use conductor_agent::{
    CommandService, Orchestrator, PhaseOutcome, ReasoningService, ScriptedService,
};
use conductor_core::config::Config;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    root: &Path,
    unit: &str,
    task: &str,
    script: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    let service: Arc<dyn ReasoningService> = match script {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            let lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
            Arc::new(ScriptedService::new(lines))
        }
        None => Arc::new(CommandService::from_config(&config.reasoning)),
    };

    let orchestrator = Orchestrator::new(root, config, service)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let outcome = runtime
        .block_on(orchestrator.run_phase(unit, task))
        .with_context(|| format!("run of unit '{unit}' failed"))?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        PhaseOutcome::Advanced { from, to, output } => {
            println!("{output}");
            println!("\nAdvanced: {from} -> {to}");
        }
        PhaseOutcome::AwaitingApproval {
            phase,
            output,
            approved,
            missing,
        } => {
            println!("{output}");
            println!("\nPhase {phase} finished its work but cannot advance yet:");
            if !approved {
                println!("  - awaiting approval (conductor approve {unit})");
            }
            for kind in missing {
                println!("  - missing artifact: {kind}");
            }
        }
        PhaseOutcome::Incomplete { phase, spent } => {
            println!("Phase {phase} ran out of budget after {spent} steps; run again to continue.");
        }
    }
    Ok(())
}
