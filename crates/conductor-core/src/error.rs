use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("not initialized: run 'conductor init'")]
    NotInitialized,

    #[error("unit of work not found: {0}")]
    UnitNotFound(String),

    #[error("unit of work already exists: {0}")]
    UnitExists(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("illegal transition from {from} to {to}: {reason}")]
    IllegalTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("unknown artifact kind: {0}")]
    UnknownArtifact(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("memory store error: {0}")]
    Memory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ConductorError {
    pub fn illegal(from: impl ToString, to: impl ToString, reason: impl Into<String>) -> Self {
        ConductorError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
