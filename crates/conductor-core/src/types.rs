use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Planning,
    Design,
    Implementation,
    Verification,
    Done,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Analysis,
            Phase::Planning,
            Phase::Design,
            Phase::Implementation,
            Phase::Verification,
            Phase::Done,
        ]
    }

    pub fn first() -> Phase {
        Phase::Analysis
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        let all = Phase::all();
        all.get(self.index() + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::Planning => "planning",
            Phase::Design => "design",
            Phase::Implementation => "implementation",
            Phase::Verification => "verification",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Phase::Analysis),
            "planning" => Ok(Phase::Planning),
            "design" => Ok(Phase::Design),
            "implementation" => Ok(Phase::Implementation),
            "verification" => Ok(Phase::Verification),
            "done" => Ok(Phase::Done),
            _ => Err(crate::error::ConductorError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Brief,
    Requirements,
    Architecture,
    Stories,
    Changeset,
    VerificationReport,
}

impl ArtifactKind {
    pub fn all() -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Brief,
            ArtifactKind::Requirements,
            ArtifactKind::Architecture,
            ArtifactKind::Stories,
            ArtifactKind::Changeset,
            ArtifactKind::VerificationReport,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Brief => "brief",
            ArtifactKind::Requirements => "requirements",
            ArtifactKind::Architecture => "architecture",
            ArtifactKind::Stories => "stories",
            ArtifactKind::Changeset => "changeset",
            ArtifactKind::VerificationReport => "verification_report",
        }
    }

    pub fn filename(self) -> &'static str {
        match self {
            ArtifactKind::Brief => "brief.md",
            ArtifactKind::Requirements => "requirements.md",
            ArtifactKind::Architecture => "architecture.md",
            ArtifactKind::Stories => "stories.md",
            ArtifactKind::Changeset => "changeset.md",
            ArtifactKind::VerificationReport => "verification-report.md",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = crate::error::ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brief" => Ok(ArtifactKind::Brief),
            "requirements" => Ok(ArtifactKind::Requirements),
            "architecture" => Ok(ArtifactKind::Architecture),
            "stories" => Ok(ArtifactKind::Stories),
            "changeset" => Ok(ArtifactKind::Changeset),
            "verification_report" | "verification-report" => Ok(ArtifactKind::VerificationReport),
            _ => Err(crate::error::ConductorError::UnknownArtifact(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Draft,
    Planned,
    InProgress,
    Completed,
    Blocked,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Draft => "draft",
            UnitStatus::Planned => "planned",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
            UnitStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
