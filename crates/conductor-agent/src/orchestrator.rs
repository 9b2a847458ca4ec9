use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::artifact::DiskArtifacts;
use conductor_core::config::Config;
use conductor_core::machine::PhaseMachine;
use conductor_core::memory::{MemoryManager, Origin};
use conductor_core::paths;
use conductor_core::prompt::PromptStack;
use conductor_core::protocol::{ContextEntry, ContextKind};
use conductor_core::role::Role;
use conductor_core::types::{ArtifactKind, Phase, UnitStatus};
use conductor_core::unit::UnitState;
use conductor_core::ConductorError;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::capability::{Capability, CapabilityRegistry};
use crate::execution::{Budget, ExecutionLoop, ExecutionResult};
use crate::service::ReasoningService;
use crate::{AgentError, Result};

// ─── PhaseOutcome ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The phase's primary role finished and the unit moved on.
    Advanced {
        from: Phase,
        to: Phase,
        output: String,
    },
    /// The primary role finished; the phase still needs approval or
    /// artifacts before it can be left.
    AwaitingApproval {
        phase: Phase,
        output: String,
        approved: bool,
        missing: Vec<ArtifactKind>,
    },
    /// The primary role ran out of budget. The unit stays `in_progress`
    /// and can be run again with a fresh budget.
    Incomplete { phase: Phase, spent: u32 },
}

/// A suspended role waiting on a delegate, or the active one at the top.
struct Frame {
    role: Role,
    budget: Budget,
    context: Vec<ContextEntry>,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────

/// Runs the current phase of a unit of work and advances it when allowed.
///
/// Holds no per-unit state: every call loads the unit, owns its memory for
/// the duration of the call and persists through the phase machine, so
/// distinct units may be driven concurrently.
pub struct Orchestrator {
    root: PathBuf,
    config: Config,
    service: Arc<dyn ReasoningService>,
    prompts: PromptStack,
    extra: Vec<Arc<dyn Capability>>,
}

impl Orchestrator {
    pub fn new(root: &Path, config: Config, service: Arc<dyn ReasoningService>) -> Result<Self> {
        let prompts = PromptStack::load(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            service,
            prompts,
            extra: Vec::new(),
        })
    }

    pub fn with_prompts(mut self, prompts: PromptStack) -> Self {
        self.prompts = prompts;
        self
    }

    /// Make an extra capability available in every unit's registry.
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.extra.push(capability);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self, unit: &str) -> CapabilityRegistry {
        let timeout = Duration::from_secs(self.config.capabilities.timeout_secs);
        let mut registry = CapabilityRegistry::with_builtins(&paths::unit_dir(&self.root, unit), timeout);
        for cap in &self.extra {
            registry.add(Arc::clone(cap));
        }
        registry
    }

    fn primary_role(&self, phase: Phase) -> Result<Role> {
        let id = self
            .config
            .phases
            .roles_for(phase)
            .first()
            .ok_or(AgentError::NoRoleForPhase(phase))?;
        self.config
            .role(id)
            .map_err(|_| AgentError::UnknownRole(id.clone()))
    }

    // ─── run_phase ────────────────────────────────────────────────────────

    /// Run the current phase's primary role on `task`, following
    /// delegations, then try to advance.
    pub async fn run_phase(&self, unit_id: &str, task: &str) -> Result<PhaseOutcome> {
        let machine = PhaseMachine::new(&self.config.phases);
        let unit = UnitState::load(&self.root, unit_id)?;
        let phase = unit.phase();

        if unit.is_archived() {
            return Err(not_runnable(unit_id, "unit is archived"));
        }
        match unit.status() {
            UnitStatus::Blocked => {
                let why = unit.blocked_reason().unwrap_or("no reason given");
                return Err(not_runnable(unit_id, &format!("unit is blocked: {why}")));
            }
            UnitStatus::Completed => return Err(not_runnable(unit_id, "unit is completed")),
            _ => {}
        }
        if phase.is_terminal() {
            return Err(not_runnable(unit_id, "unit is in its terminal phase"));
        }

        let primary = self.primary_role(phase)?;
        let started = machine.mark_in_progress(&unit)?;
        started.save(&self.root)?;

        let mut memory = MemoryManager::open_unit(&self.root, unit_id, &self.config.memory)?;
        let registry = self.registry(unit_id);
        let exec = ExecutionLoop::new(unit_id, self.service.as_ref(), &registry, &self.prompts)
            .recall_limit(self.config.memory.recall_limit)
            .delegates(self.config.phases.roles_for(phase));

        info!(unit = unit_id, phase = %phase, role = %primary.id, "running phase");
        let mut frames = vec![Frame {
            budget: Budget::new(primary.budget),
            context: vec![ContextEntry::new(ContextKind::Task, task)],
            role: primary,
        }];

        let output = loop {
            let Some(top) = frames.last_mut() else {
                // The primary frame is only popped on completion.
                return Err(AgentError::Service("delegation stack emptied".into()));
            };
            let result = exec
                .run(&top.role, &top.context, &mut top.budget, &mut memory)
                .await?;

            match result {
                ExecutionResult::Completed { output } => {
                    let done = frames.pop();
                    if frames.is_empty() {
                        break output;
                    }
                    let delegate = done.map(|f| f.role.id).unwrap_or_default();
                    memory.append(
                        Origin::Input,
                        format!("delegate '{delegate}' answered: {output}"),
                    )?;
                }
                ExecutionResult::BudgetExhausted => {
                    if frames.len() == 1 {
                        let spent = frames[0].budget.spent();
                        info!(unit = unit_id, phase = %phase, spent, "phase incomplete");
                        return Ok(PhaseOutcome::Incomplete { phase, spent });
                    }
                    let done = frames.pop();
                    let delegate = done.map(|f| f.role.id).unwrap_or_default();
                    warn!(delegate = %delegate, "delegate exhausted its budget");
                    memory.append(
                        Origin::Input,
                        format!("delegate '{delegate}' ran out of budget without an answer"),
                    )?;
                }
                ExecutionResult::Delegated { target, query } => {
                    let depth = frames.len() as u32;
                    if depth > self.config.orchestrator.max_delegation_depth {
                        return Err(AgentError::DelegationDepth(
                            self.config.orchestrator.max_delegation_depth,
                        ));
                    }
                    let role = self
                        .config
                        .role(&target)
                        .map_err(|_| AgentError::UnknownRole(target.clone()))?;
                    let from = frames.last().map(|f| f.role.id.clone()).unwrap_or_default();
                    info!(from = %from, to = %role.id, depth, "delegating");
                    frames.push(Frame {
                        budget: Budget::new(role.budget),
                        context: vec![
                            ContextEntry::new(ContextKind::Task, query),
                            ContextEntry::new(ContextKind::Observation, format!("asked by role '{from}'")),
                        ],
                        role,
                    });
                }
            }
        };

        self.settle(unit_id, phase, output)
    }

    /// After the primary role completes: advance if the gates allow,
    /// otherwise report what the phase is waiting on.
    fn settle(&self, unit_id: &str, phase: Phase, output: String) -> Result<PhaseOutcome> {
        let machine = PhaseMachine::new(&self.config.phases);
        let disk = DiskArtifacts::new(&self.root);
        let mut unit = UnitState::load(&self.root, unit_id)?;
        let missing = machine.missing_artifacts(&unit, &disk);
        let approved = unit.is_approved(phase);

        if approved && missing.is_empty() {
            if let Some(to) = phase.next() {
                machine.transition_persisted(&self.root, &mut unit, to, &disk)?;
                return Ok(PhaseOutcome::Advanced {
                    from: phase,
                    to,
                    output,
                });
            }
        }
        info!(unit = unit_id, phase = %phase, approved, missing = missing.len(), "awaiting approval");
        Ok(PhaseOutcome::AwaitingApproval {
            phase,
            output,
            approved,
            missing,
        })
    }

    /// Run the current phase of several units concurrently. Results come
    /// back in input order; a unit listed twice only runs once.
    pub async fn run_units(&self, jobs: &[(String, String)]) -> Vec<Result<PhaseOutcome>> {
        let mut seen = BTreeSet::new();
        let runs = jobs.iter().map(|(unit, task)| {
            let duplicate = !seen.insert(unit.as_str());
            async move {
                if duplicate {
                    return Err(not_runnable(unit, "already running in this batch"));
                }
                self.run_phase(unit, task).await
            }
        });
        join_all(runs).await
    }

    /// Advance the unit to its next phase through the phase machine.
    pub fn advance(&self, unit_id: &str) -> Result<UnitState> {
        let machine = PhaseMachine::new(&self.config.phases);
        let disk = DiskArtifacts::new(&self.root);
        let mut unit = UnitState::load(&self.root, unit_id)?;
        let to = unit.phase().next().ok_or_else(|| {
            ConductorError::illegal(unit.phase(), unit.phase(), "already in the terminal phase")
        })?;
        machine.transition_persisted(&self.root, &mut unit, to, &disk)?;
        Ok(unit)
    }
}

fn not_runnable(unit: &str, reason: &str) -> AgentError {
    AgentError::NotRunnable {
        unit: unit.to_string(),
        reason: reason.to_string(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
