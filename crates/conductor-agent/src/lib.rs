//! `conductor-agent`: the async half of conductor.
//!
//! Drives a role through the think/act/observe loop against an external
//! reasoning service, dispatches the actions it picks through a scoped
//! capability registry, and sequences roles and delegations per phase.
//!
//! ```text
//! Orchestrator ── per phase ──▶ ExecutionLoop ──▶ ReasoningService
//!      │                            │
//!      │                            ├──▶ CapabilityRegistry
//!      ▼                            ▼
//!  PhaseMachine                 MemoryManager
//! ```

pub mod capability;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod service;

pub use capability::{Capability, CapabilityError, CapabilityRegistry, DeclaredScope};
pub use error::AgentError;
pub use execution::{Budget, ExecutionLoop, ExecutionResult};
pub use orchestrator::{Orchestrator, PhaseOutcome};
pub use service::{CommandService, ReasoningService, ScriptedService};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
