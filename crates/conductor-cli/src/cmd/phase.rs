//! Commands that move a unit through the phase machine.

use crate::output::print_json;
use anyhow::Context;
use conductor_core::{
    artifact::DiskArtifacts, config::Config, machine::PhaseMachine, unit::UnitState,
};
use std::path::Path;

fn load(root: &Path, id: &str) -> anyhow::Result<(Config, UnitState)> {
    let config = Config::load(root).context("failed to load config")?;
    let unit = UnitState::load(root, id).with_context(|| format!("unit '{id}' not found"))?;
    Ok((config, unit))
}

fn report(unit: &UnitState, message: String, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(unit);
    }
    println!("{message}");
    Ok(())
}

pub fn approve(root: &Path, id: &str, by: Option<String>, json: bool) -> anyhow::Result<()> {
    let (config, unit) = load(root, id)?;
    let next = PhaseMachine::new(&config.phases).approve(&unit, by)?;
    next.save(root)?;
    report(&next, format!("Approved '{id}' in phase {}", next.phase()), json)
}

pub fn reject(root: &Path, id: &str, reason: &str, json: bool) -> anyhow::Result<()> {
    let (config, unit) = load(root, id)?;
    let next = PhaseMachine::new(&config.phases).reject_and_redo(&unit, reason)?;
    next.save(root)?;
    report(&next, format!("Rejected '{id}'; redoing phase {}", next.phase()), json)
}

pub fn block(root: &Path, id: &str, reason: &str, json: bool) -> anyhow::Result<()> {
    let (config, unit) = load(root, id)?;
    let next = PhaseMachine::new(&config.phases).block(&unit, reason)?;
    next.save(root)?;
    report(&next, format!("Blocked '{id}': {reason}"), json)
}

pub fn unblock(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (config, unit) = load(root, id)?;
    let next = PhaseMachine::new(&config.phases).unblock(&unit)?;
    next.save(root)?;
    report(&next, format!("Unblocked '{id}' ({})", next.status()), json)
}

pub fn advance(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (config, mut unit) = load(root, id)?;
    let from = unit.phase();
    let to = from
        .next()
        .with_context(|| format!("unit '{id}' is already in its terminal phase"))?;
    PhaseMachine::new(&config.phases).transition_persisted(
        root,
        &mut unit,
        to,
        &DiskArtifacts::new(root),
    )?;
    report(&unit, format!("Advanced '{id}': {from} -> {to}"), json)
}
