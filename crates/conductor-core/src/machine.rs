use crate::artifact::ArtifactProbe;
use crate::config::PhaseConfig;
use crate::error::{ConductorError, Result};
use crate::types::{ArtifactKind, Phase, UnitStatus};
use crate::unit::{Approval, TransitionRecord, UnitState};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// The linear, artifact-gated phase sequence.
///
/// Every mutating operation validates against a copy of the state and only
/// hands back (or persists) the copy once every check has passed, so a
/// failed call never leaves a partially updated unit behind.
pub struct PhaseMachine<'a> {
    phases: &'a PhaseConfig,
}

impl<'a> PhaseMachine<'a> {
    pub fn new(phases: &'a PhaseConfig) -> Self {
        Self { phases }
    }

    /// Ordering rule only: `target` must be the immediate successor.
    pub fn can_enter(&self, current: Phase, target: Phase) -> bool {
        current.next() == Some(target)
    }

    /// Artifacts that must exist to leave `phase`.
    pub fn required_artifacts(&self, phase: Phase) -> BTreeSet<ArtifactKind> {
        self.phases.exit_for(phase).iter().copied().collect()
    }

    /// Artifacts that must exist to enter `phase`.
    pub fn entry_artifacts(&self, phase: Phase) -> BTreeSet<ArtifactKind> {
        self.phases.entry_for(phase).iter().copied().collect()
    }

    /// Artifacts still missing before `state` may leave its current phase.
    pub fn missing_artifacts(&self, state: &UnitState, probe: &dyn ArtifactProbe) -> Vec<ArtifactKind> {
        let mut wanted = self.required_artifacts(state.phase);
        if let Some(next) = state.phase.next() {
            wanted.extend(self.entry_artifacts(next));
        }
        wanted
            .into_iter()
            .filter(|k| !probe.exists(&state.id, *k))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Validate a move of `state` into `target` and return the resulting
    /// state. `state` itself is never touched.
    pub fn transition(
        &self,
        state: &UnitState,
        target: Phase,
        probe: &dyn ArtifactProbe,
    ) -> Result<UnitState> {
        let from = state.phase;
        let illegal = |reason: String| ConductorError::illegal(from, target, reason);

        if state.archived {
            return Err(illegal("unit is archived".to_string()));
        }
        if state.status == UnitStatus::Blocked {
            let why = state.blocked_reason.as_deref().unwrap_or("no reason given");
            return Err(illegal(format!("unit is blocked: {why}")));
        }
        if !self.can_enter(from, target) {
            let rule = match from.next() {
                Some(next) => format!("only '{next}' may follow '{from}'"),
                None => format!("'{from}' is the terminal phase"),
            };
            return Err(illegal(rule));
        }

        for kind in self.required_artifacts(from) {
            if !probe.exists(&state.id, kind) {
                return Err(illegal(format!("missing exit artifact '{kind}'")));
            }
        }
        for kind in self.entry_artifacts(target) {
            if !probe.exists(&state.id, kind) {
                return Err(illegal(format!("missing entry artifact '{kind}'")));
            }
        }
        if !state.is_approved(from) {
            return Err(illegal(format!("no approval recorded for '{from}'")));
        }

        let now = Utc::now();
        let mut next = state.clone();
        next.phase = target;
        next.history.push(TransitionRecord {
            from,
            to: target,
            timestamp: now,
            note: None,
        });
        if target.is_terminal() {
            next.status = UnitStatus::Completed;
        } else if next.status == UnitStatus::Draft {
            next.status = UnitStatus::Planned;
        }
        next.updated_at = now;
        Ok(next)
    }

    /// Transition to the successor of the current phase.
    pub fn advance(&self, state: &UnitState, probe: &dyn ArtifactProbe) -> Result<UnitState> {
        let target = state
            .phase
            .next()
            .ok_or_else(|| ConductorError::illegal(state.phase, state.phase, "already in the terminal phase"))?;
        self.transition(state, target, probe)
    }

    /// Validate, persist, then commit. If validation or the write fails,
    /// `state` and the state file both keep their prior contents.
    pub fn transition_persisted(
        &self,
        root: &Path,
        state: &mut UnitState,
        target: Phase,
        probe: &dyn ArtifactProbe,
    ) -> Result<()> {
        let next = self.transition(state, target, probe)?;
        next.save(root)?;
        info!(unit = %next.id, from = %state.phase, to = %target, "phase transition");
        *state = next;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Approval / rejection
    // -----------------------------------------------------------------------

    /// Record the external approval signal for the current phase.
    pub fn approve(&self, state: &UnitState, by: Option<String>) -> Result<UnitState> {
        let phase = state.phase;
        self.ensure_mutable(state)?;
        if phase.is_terminal() {
            return Err(ConductorError::illegal(phase, phase, "terminal phase takes no approval"));
        }
        let mut next = state.clone();
        let now = Utc::now();
        next.approvals.retain(|a| a.phase != phase);
        next.approvals.push(Approval { phase, by, at: now });
        next.updated_at = now;
        Ok(next)
    }

    /// Re-enter the current phase: drop its approval and log a self-loop in
    /// the history.
    pub fn reject_and_redo(&self, state: &UnitState, reason: impl Into<String>) -> Result<UnitState> {
        let phase = state.phase;
        self.ensure_mutable(state)?;
        if phase.is_terminal() {
            return Err(ConductorError::illegal(phase, phase, "terminal phase cannot be redone"));
        }
        let now = Utc::now();
        let mut next = state.clone();
        next.approvals.retain(|a| a.phase != phase);
        next.history.push(TransitionRecord {
            from: phase,
            to: phase,
            timestamp: now,
            note: Some(reason.into()),
        });
        next.updated_at = now;
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn mark_in_progress(&self, state: &UnitState) -> Result<UnitState> {
        self.ensure_mutable(state)?;
        if state.status == UnitStatus::Completed {
            return Err(ConductorError::illegal(state.phase, state.phase, "unit is completed"));
        }
        let mut next = state.clone();
        next.status = UnitStatus::InProgress;
        next.updated_at = Utc::now();
        Ok(next)
    }

    pub fn block(&self, state: &UnitState, reason: impl Into<String>) -> Result<UnitState> {
        if state.archived {
            return Err(ConductorError::illegal(state.phase, state.phase, "unit is archived"));
        }
        let mut next = state.clone();
        next.status = UnitStatus::Blocked;
        next.blocked_reason = Some(reason.into());
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Lift a block. The unit returns to `in_progress` when it had started
    /// work, otherwise to `draft`/`planned` by phase.
    pub fn unblock(&self, state: &UnitState) -> Result<UnitState> {
        if state.status != UnitStatus::Blocked {
            return Err(ConductorError::illegal(state.phase, state.phase, "unit is not blocked"));
        }
        let mut next = state.clone();
        next.status = if next.history.iter().any(|r| r.from != r.to) {
            UnitStatus::InProgress
        } else if next.phase == Phase::first() {
            UnitStatus::Draft
        } else {
            UnitStatus::Planned
        };
        next.blocked_reason = None;
        next.updated_at = Utc::now();
        Ok(next)
    }

    fn ensure_mutable(&self, state: &UnitState) -> Result<()> {
        if state.archived {
            return Err(ConductorError::illegal(state.phase, state.phase, "unit is archived"));
        }
        if state.status == UnitStatus::Blocked {
            return Err(ConductorError::illegal(state.phase, state.phase, "unit is blocked"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
