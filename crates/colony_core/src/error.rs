use thiserror::Error;

use crate::AgentId;

/// Contract violations. Expected non-starts and mid-run degradations are
/// never errors; they end the task as `TaskOutcome::Aborted`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task {task} has no current phase")]
    NullPhase { task: String },
    #[error("task {task} dispatched to unregistered phase {phase}")]
    UnregisteredPhase { task: String, phase: String },
    #[error("task {task} made {limit} phase dispatches in one advance without using its time (last phase {phase})")]
    RunawayPhase {
        task: String,
        phase: String,
        limit: u32,
    },
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),
}
