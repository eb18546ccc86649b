//! [`Plan`] — the planner's (or caller-supplied) task list for one goal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// A plan is immutable after approval except that the coordinator
/// increments `version` on replanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub goal: String,
    pub tasks: Vec<Task>,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub version: u32,
}

impl Plan {
    pub fn new(goal: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            tasks,
            approved: false,
            approved_at: None,
            version: 1,
        }
    }

    pub fn approve(&mut self) {
        self.approved = true;
        self.approved_at = Some(Utc::now());
    }

    /// Replace the task list wholesale during an `edit` approval decision.
    /// Bumps `version` and resets `approved`, so the caller must approve
    /// again after editing.
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.version += 1;
        self.approved = false;
        self.approved_at = None;
    }
}
