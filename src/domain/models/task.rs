//! The atomic unit of work: [`Task`] and its identity/status types.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sub_result::SubResult;

/// Opaque, unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behavioral profile of a subagent spawned to run a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Worker,
    Critic,
    Aggregator,
}

impl Role {
    /// Constant system-prompt table keyed by role.
    pub const fn system_prompt(self) -> &'static str {
        match self {
            Role::Planner => {
                "You decompose a goal into an ordered set of concrete, independently \
                 verifiable subtasks with explicit dependencies. Output only the plan."
            }
            Role::Worker => {
                "You execute exactly one subtask using only the tools you were granted. \
                 Report a concise result; do not attempt work outside your subtask."
            }
            Role::Critic => {
                "You review an aggregated result against the original goal and the task \
                 list. Report issues by category and severity; never rubber-stamp."
            }
            Role::Aggregator => {
                "You synthesize the partial outputs of completed subtasks into one \
                 coherent result for the original goal."
            }
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Worker
    }
}

/// Lifecycle status of a [`Task`] within a [`crate::services::task_graph::TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition further within a swarm run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Cancelled
        )
    }

    pub fn is_failure_like(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Cancelled)
    }
}

/// The atomic unit of swarm work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub role: Role,
    /// 1 = highest priority, 5 = lowest.
    pub priority: u8,
    pub depends_on: BTreeSet<TaskId>,
    pub required_tools: Option<Vec<String>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SubResult>,
    pub assigned_agent_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Default priority assigned by [`crate::services::task_graph::TaskGraph::add_task`]
/// when the caller does not specify one.
pub const DEFAULT_PRIORITY: u8 = 3;

impl Task {
    /// Construct a new, pending task. `priority` defaults to
    /// [`DEFAULT_PRIORITY`] and `role` to [`Role::Worker`] if unset by the
    /// caller.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            role: Role::Worker,
            priority: DEFAULT_PRIORITY,
            depends_on: BTreeSet::new(),
            required_tools: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            assigned_agent_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_required_tools(mut self, tools: Vec<String>) -> Self {
        self.required_tools = Some(tools);
        self
    }

    /// Apply a validated status transition, stamping timestamps as needed.
    ///
    /// Callers are expected to have already checked the transition is legal
    /// (see module docs on [`TaskStatus`]); this just performs the mutation
    /// and timestamp bookkeeping in one place so every caller stays in sync.
    pub fn transition_to(&mut self, status: TaskStatus) {
        if status == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            self.completed_at = Some(Utc::now());
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults_priority_and_role() {
        let t = Task::new("do the thing");
        assert_eq!(t.priority, DEFAULT_PRIORITY);
        assert_eq!(t.role, Role::Worker);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.started_at.is_none());
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn transition_to_running_sets_started_at_once() {
        let mut t = Task::new("x");
        t.transition_to(TaskStatus::Running);
        let first = t.started_at.unwrap();
        t.transition_to(TaskStatus::Running);
        assert_eq!(t.started_at.unwrap(), first);
    }

    #[test]
    fn transition_to_completed_sets_completed_at() {
        let mut t = Task::new("x");
        t.transition_to(TaskStatus::Running);
        t.transition_to(TaskStatus::Completed);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn blocked_never_sets_started_at() {
        let mut t = Task::new("x");
        t.transition_to(TaskStatus::Blocked);
        assert!(t.started_at.is_none());
        assert!(t.status.is_terminal());
    }
}
