use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use conductor_core::{artifact::DiskArtifacts, config::Config, io, unit::UnitState};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum UnitSubcommand {
    /// Create a unit of work in the first phase
    Create {
        /// Slug id (lowercase letters, digits, hyphens)
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Show a unit's phase, status, approvals, artifacts and history
    Show { id: String },

    /// List active units
    List,

    /// Move a unit under .conductor/archive/
    Archive { id: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: UnitSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        UnitSubcommand::Create {
            id,
            title,
            description,
        } => create(root, &id, title, description, json),
        UnitSubcommand::Show { id } => show(root, &id, json),
        UnitSubcommand::List => list(root, json),
        UnitSubcommand::Archive { id } => archive(root, &id, json),
    }
}

fn create(
    root: &Path,
    id: &str,
    title: Option<String>,
    description: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    Config::load(root).context("failed to load config")?;
    let title = title.unwrap_or_else(|| id.to_string());
    let mut unit = UnitState::create(root, id, title)
        .with_context(|| format!("failed to create unit '{id}'"))?;
    if let Some(d) = description {
        unit = unit.with_description(d);
        unit.save(root)?;
    }
    io::ensure_dir(&conductor_core::paths::artifacts_dir(root, id))?;

    if json {
        return print_json(&unit);
    }
    println!("Created unit '{}' in phase {}", unit.id(), unit.phase());
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let unit = UnitState::load(root, id).with_context(|| format!("unit '{id}' not found"))?;
    let artifacts = DiskArtifacts::new(root).report(id);

    if json {
        return print_json(&serde_json::json!({
            "unit": unit,
            "artifacts": artifacts,
        }));
    }

    println!("{} ({})", unit.title(), unit.id());
    if let Some(d) = unit.description() {
        println!("  {d}");
    }
    println!("Phase:    {}", unit.phase());
    println!("Status:   {}", unit.status());
    if let Some(reason) = unit.blocked_reason() {
        println!("Blocked:  {reason}");
    }
    let approved = match unit.approval_for(unit.phase()) {
        Some(a) => format!("yes{}", a.by.as_deref().map(|b| format!(" (by {b})")).unwrap_or_default()),
        None => "no".to_string(),
    };
    println!("Approved: {approved}");

    println!("\nArtifacts:");
    for a in &artifacts {
        let mark = if a.present { "x" } else { " " };
        println!("  [{mark}] {}", a.kind);
    }

    if !unit.history().is_empty() {
        println!("\nHistory:");
        for r in unit.history() {
            let when = r.timestamp.format("%Y-%m-%d %H:%M");
            match &r.note {
                Some(note) => println!("  {when}  {} -> {}  ({note})", r.from, r.to),
                None => println!("  {when}  {} -> {}", r.from, r.to),
            }
        }
    }
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let units = UnitState::list(root).context("failed to list units")?;
    if json {
        return print_json(&units);
    }
    if units.is_empty() {
        println!("No units.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = units
        .iter()
        .map(|u| {
            vec![
                u.id().to_string(),
                u.phase().to_string(),
                u.status().to_string(),
                u.title().to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "PHASE", "STATUS", "TITLE"], &rows);
    Ok(())
}

fn archive(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let unit = UnitState::load(root, id).with_context(|| format!("unit '{id}' not found"))?;
    let archived = unit.archive(root).with_context(|| format!("failed to archive '{id}'"))?;
    if json {
        return print_json(&archived);
    }
    println!("Archived unit '{id}'");
    Ok(())
}
