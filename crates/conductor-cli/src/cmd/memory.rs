use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use conductor_core::{config::Config, memory::MemoryManager, unit::UnitState};
use std::path::Path;

#[derive(Subcommand)]
pub enum MemorySubcommand {
    /// Search a unit's Warm and Cold tiers
    Query {
        unit: String,
        text: String,
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Compress the oldest half of Hot if it is under pressure
    Compact { unit: String },

    /// Print the unit's full Frozen history
    Frozen { unit: String },
}

pub fn run(root: &Path, subcmd: MemorySubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let unit = match &subcmd {
        MemorySubcommand::Query { unit, .. }
        | MemorySubcommand::Compact { unit }
        | MemorySubcommand::Frozen { unit } => unit.clone(),
    };
    UnitState::load(root, &unit).with_context(|| format!("unit '{unit}' not found"))?;
    let mut memory = MemoryManager::open_unit(root, &unit, &config.memory)
        .with_context(|| format!("failed to open memory of '{unit}'"))?;

    match subcmd {
        MemorySubcommand::Query { text, limit, .. } => {
            let hits = memory.query(&text, limit)?;
            if json {
                return print_json(&hits);
            }
            if hits.is_empty() {
                println!("No matches.");
                return Ok(());
            }
            for h in hits {
                println!("{} (seq {}-{}):\n{}\n", h.warm_id, h.first_seq, h.last_seq, h.summary);
            }
        }
        MemorySubcommand::Compact { .. } => {
            let before = memory.hot_size();
            let entry = memory.compress()?;
            if json {
                return print_json(&serde_json::json!({
                    "compressed": entry,
                    "hot_before": before,
                    "hot_after": memory.hot_size(),
                }));
            }
            match entry {
                Some(w) => println!(
                    "Compressed seq {}-{} into {} (hot {} -> {})",
                    w.first_seq,
                    w.last_seq,
                    w.id,
                    before,
                    memory.hot_size()
                ),
                None => println!("Hot is below its pressure threshold; nothing to compress."),
            }
        }
        MemorySubcommand::Frozen { .. } => {
            let fragments = memory.frozen()?;
            if json {
                return print_json(&fragments);
            }
            let rows: Vec<Vec<String>> = fragments
                .iter()
                .map(|f| {
                    let first = f.payload.lines().next().unwrap_or("");
                    vec![
                        f.seq.to_string(),
                        f.timestamp.format("%H:%M:%S").to_string(),
                        f.origin.to_string(),
                        first.to_string(),
                    ]
                })
                .collect();
            print_table(&["SEQ", "TIME", "ORIGIN", "PAYLOAD"], &rows);
        }
    }
    Ok(())
}
