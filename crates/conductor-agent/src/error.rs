use conductor_core::protocol::DecodeError;
use conductor_core::types::Phase;
use conductor_core::ConductorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] ConductorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reasoning service error: {0}")]
    Service(String),

    #[error("reasoning service timed out after {0}s")]
    Timeout(u64),

    #[error("no usable response after {attempts} attempts; last error: {last}")]
    DecodeExhausted { attempts: u32, last: DecodeError },

    #[error("delegation depth limit {0} exceeded")]
    DelegationDepth(u32),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("no role is configured for phase '{0}'")]
    NoRoleForPhase(Phase),

    #[error("unit '{unit}' cannot run: {reason}")]
    NotRunnable { unit: String, reason: String },
}
