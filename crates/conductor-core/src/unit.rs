use crate::error::{ConductorError, Result};
use crate::paths;
use crate::types::{Phase, UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// TransitionRecord / Approval
// ---------------------------------------------------------------------------

/// One entry of the append-only transition history. A record with
/// `from == to` is a reject-and-redo of that phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

/// The durable record of one unit of work.
///
/// Fields are crate-private: outside this crate the state is read through
/// accessors and changed only through [`crate::machine::PhaseMachine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
    pub(crate) phase: Phase,
    pub(crate) status: UnitStatus,
    pub(crate) history: Vec<TransitionRecord>,
    #[serde(default)]
    pub(crate) approvals: Vec<Approval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) blocked_reason: Option<String>,
    #[serde(default)]
    pub(crate) archived: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl UnitState {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            phase: Phase::first(),
            status: UnitStatus::Draft,
            history: Vec::new(),
            approvals: Vec::new(),
            blocked_reason: None,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    // ---------------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn approval_for(&self, phase: Phase) -> Option<&Approval> {
        self.approvals.iter().find(|a| a.phase == phase)
    }

    pub fn is_approved(&self, phase: Phase) -> bool {
        self.approval_for(phase).is_some()
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    pub fn create(root: &Path, id: impl Into<String>, title: impl Into<String>) -> Result<Self> {
        let id = id.into();
        paths::validate_slug(&id)?;

        if paths::unit_dir(root, &id).exists() || paths::archive_dir(root, &id).exists() {
            return Err(ConductorError::UnitExists(id));
        }

        let unit = Self::new(id, title);
        unit.save(root)?;
        Ok(unit)
    }

    pub fn load(root: &Path, id: &str) -> Result<Self> {
        let path = paths::unit_state(root, id);
        if !path.exists() {
            return Err(ConductorError::UnitNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let unit: UnitState = serde_yaml::from_str(&data)?;
        Ok(unit)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::unit_state(root, &self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let units_dir = root.join(paths::UNITS_DIR);
        if !units_dir.exists() {
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        for entry in std::fs::read_dir(&units_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let id = entry.file_name().to_string_lossy().into_owned();
                match Self::load(root, &id) {
                    Ok(u) => units.push(u),
                    Err(ConductorError::UnitNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        units.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(units)
    }

    /// Move the unit directory (state, artifacts, memory) under the archive
    /// and mark it archived. Archived units are never deleted.
    pub fn archive(mut self, root: &Path) -> Result<Self> {
        let from = paths::unit_dir(root, &self.id);
        if !from.exists() {
            return Err(ConductorError::UnitNotFound(self.id));
        }
        self.archived = true;
        self.updated_at = Utc::now();
        self.save(root)?;

        let to = paths::archive_dir(root, &self.id);
        if let Some(parent) = to.parent() {
            crate::io::ensure_dir(parent)?;
        }
        std::fs::rename(&from, &to)?;
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
