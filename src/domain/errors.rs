//! Domain errors for the swarm orchestration core.

use thiserror::Error;

use super::models::TaskId;

/// Domain-level errors: programming errors and API misuse.
///
/// Operational failures (admission refusal, timeout, dependency failure,
/// cancellation, budget/deadline exceeded) are represented as *values*
/// elsewhere (status variants, `Option<String>` error fields) and never
/// surface through this type.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("task {0} already exists in the graph")]
    DuplicateTask(TaskId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("dependency cycle detected involving task {0}")]
    DependencyCycle(TaskId),

    #[error("invalid state transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: String,
        to: String,
    },

    #[error("planner output could not be parsed: {0}")]
    PlanParseError(String),

    #[error("plan already approved, cannot {0}")]
    PlanAlreadyApproved(String),

    #[error("dispatch requested while dispatcher is already running")]
    DispatchAlreadyRunning,

    #[error("queue size {requested} exceeds maxQueueSize {max}")]
    QueueOverflow { requested: usize, max: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
