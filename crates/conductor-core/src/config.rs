use crate::error::{ConductorError, Result};
use crate::paths;
use crate::role::{Role, Scope};
use crate::types::{ArtifactKind, Phase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PhaseConfig
// ---------------------------------------------------------------------------

/// Artifacts gating one phase: `entry` must exist to enter it, `exit` must
/// exist to leave it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseArtifacts {
    #[serde(default)]
    pub entry: Vec<ArtifactKind>,
    #[serde(default)]
    pub exit: Vec<ArtifactKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(default = "default_required_artifacts")]
    pub required_artifacts: HashMap<String, PhaseArtifacts>,
    /// Role ids permitted per phase. The first entry is the primary worker.
    #[serde(default = "default_phase_roles")]
    pub roles: HashMap<String, Vec<String>>,
}

fn default_required_artifacts() -> HashMap<String, PhaseArtifacts> {
    use ArtifactKind::*;
    let mut m = HashMap::new();
    let mut put = |phase: Phase, entry: Vec<ArtifactKind>, exit: Vec<ArtifactKind>| {
        m.insert(phase.as_str().to_string(), PhaseArtifacts { entry, exit });
    };
    put(Phase::Analysis, vec![], vec![Brief]);
    put(Phase::Planning, vec![Brief], vec![Requirements]);
    put(Phase::Design, vec![Requirements], vec![Architecture, Stories]);
    put(Phase::Implementation, vec![Architecture, Stories], vec![Changeset]);
    put(Phase::Verification, vec![Changeset], vec![VerificationReport]);
    put(Phase::Done, vec![VerificationReport], vec![]);
    m
}

fn default_phase_roles() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert("analysis".to_string(), vec!["analyst".to_string()]);
    m.insert("planning".to_string(), vec!["planner".to_string()]);
    m.insert(
        "design".to_string(),
        vec!["architect".to_string(), "analyst".to_string()],
    );
    m.insert(
        "implementation".to_string(),
        vec!["developer".to_string(), "architect".to_string()],
    );
    m.insert(
        "verification".to_string(),
        vec!["reviewer".to_string(), "developer".to_string()],
    );
    m
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            required_artifacts: default_required_artifacts(),
            roles: default_phase_roles(),
        }
    }
}

impl PhaseConfig {
    pub fn entry_for(&self, phase: Phase) -> &[ArtifactKind] {
        self.required_artifacts
            .get(phase.as_str())
            .map(|a| a.entry.as_slice())
            .unwrap_or(&[])
    }

    pub fn exit_for(&self, phase: Phase) -> &[ArtifactKind] {
        self.required_artifacts
            .get(phase.as_str())
            .map(|a| a.exit.as_slice())
            .unwrap_or(&[])
    }

    pub fn roles_for(&self, phase: Phase) -> &[String] {
        self.roles
            .get(phase.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// RoleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub write_scopes: Vec<String>,
    #[serde(default = "default_budget")]
    pub budget: u32,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_budget() -> u32 {
    12
}

fn default_retry_budget() -> u32 {
    2
}

fn role(capabilities: &[&str], write_scopes: &[&str]) -> RoleConfig {
    RoleConfig {
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        write_scopes: write_scopes.iter().map(|s| s.to_string()).collect(),
        budget: default_budget(),
        retry_budget: default_retry_budget(),
    }
}

fn default_roles() -> BTreeMap<String, RoleConfig> {
    let all = ["read_file", "write_file", "list_dir"];
    let mut m = BTreeMap::new();
    m.insert("analyst".to_string(), role(&all, &["artifacts"]));
    m.insert("planner".to_string(), role(&all, &["artifacts"]));
    m.insert("architect".to_string(), role(&all, &["artifacts"]));
    m.insert(
        "developer".to_string(),
        role(&all, &["artifacts/changeset.md", "workspace"]),
    );
    m.insert(
        "reviewer".to_string(),
        role(&all, &["artifacts/verification-report.md"]),
    );
    m
}

// ---------------------------------------------------------------------------
// MemoryConfig
// ---------------------------------------------------------------------------

/// Unit used to size the Hot tier against its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotMeasure {
    /// Estimated tokens (four characters per token).
    #[default]
    Tokens,
    /// One per Hot entry, fragment or summary reference alike.
    Entries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_hot_ceiling")]
    pub hot_ceiling: usize,
    #[serde(default)]
    pub measure: HotMeasure,
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_hot_ceiling() -> usize {
    8_000
}

fn default_pressure_threshold() -> f64 {
    0.8
}

fn default_chunk_size() -> usize {
    5
}

fn default_recall_limit() -> usize {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            hot_ceiling: default_hot_ceiling(),
            measure: HotMeasure::default(),
            pressure_threshold: default_pressure_threshold(),
            chunk_size: default_chunk_size(),
            recall_limit: default_recall_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReasoningConfig / CapabilityConfig / OrchestratorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
}

fn default_reasoning_command() -> String {
    "claude".to_string()
}

fn default_reasoning_timeout() -> u64 {
    300
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            command: default_reasoning_command(),
            args: vec!["--print".to_string()],
            timeout_secs: default_reasoning_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default = "default_capability_timeout")]
    pub timeout_secs: u64,
}

fn default_capability_timeout() -> u64 {
    60
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_capability_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_delegation_depth")]
    pub max_delegation_depth: u32,
}

fn default_delegation_depth() -> u32 {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: default_delegation_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub phases: PhaseConfig,
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, RoleConfig>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            phases: PhaseConfig::default(),
            roles: default_roles(),
            memory: MemoryConfig::default(),
            reasoning: ReasoningConfig::default(),
            capabilities: CapabilityConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ConductorError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Build the immutable [`Role`] for `id` from its configured entry.
    pub fn role(&self, id: &str) -> Result<Role> {
        let rc = self
            .roles
            .get(id)
            .ok_or_else(|| ConductorError::RoleNotFound(id.to_string()))?;
        Ok(Role::new(
            id,
            rc.capabilities.clone(),
            Scope::new(rc.write_scopes.clone()),
            rc.budget,
            rc.retry_budget,
        ))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        for key in self.phases.required_artifacts.keys() {
            if key.parse::<Phase>().is_err() {
                warn(
                    WarnLevel::Warning,
                    format!("unknown phase '{key}' in phases.required_artifacts"),
                );
            }
        }

        for (phase, roles) in &self.phases.roles {
            if phase.parse::<Phase>().is_err() {
                warn(
                    WarnLevel::Warning,
                    format!("unknown phase '{phase}' in phases.roles"),
                );
            }
            for role in roles {
                if !self.roles.contains_key(role) {
                    warn(
                        WarnLevel::Error,
                        format!("phase '{phase}' references undefined role '{role}'"),
                    );
                }
            }
        }

        for phase in Phase::all().iter().filter(|p| !p.is_terminal()) {
            if self.phases.roles_for(*phase).is_empty() {
                warn(
                    WarnLevel::Warning,
                    format!("phase '{phase}' has no permitted roles"),
                );
            }
        }

        for (id, rc) in &self.roles {
            if rc.capabilities.is_empty() {
                warn(
                    WarnLevel::Warning,
                    format!("role '{id}' has an empty capability allow-list"),
                );
            }
            if rc.budget == 0 {
                warn(
                    WarnLevel::Error,
                    format!("role '{id}' has a zero execution budget"),
                );
            }
        }

        let t = self.memory.pressure_threshold;
        if !(t > 0.0 && t <= 1.0) {
            warn(
                WarnLevel::Error,
                format!("memory.pressure_threshold={t} must be in (0, 1]"),
            );
        }
        if self.memory.chunk_size == 0 {
            warn(
                WarnLevel::Error,
                "memory.chunk_size must be at least 1".to_string(),
            );
        }
        if self.memory.hot_ceiling == 0 {
            warn(
                WarnLevel::Error,
                "memory.hot_ceiling must be at least 1".to_string(),
            );
        }
        if self.reasoning.command.trim().is_empty() {
            warn(
                WarnLevel::Warning,
                "reasoning.command is empty".to_string(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
