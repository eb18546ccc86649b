//! [`DispatchTask`] — the dispatcher's wrapper around a [`Task`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::Task;

/// Extended status tracked only by the dispatcher, a superset of
/// [`super::task::TaskStatus`] that distinguishes queueing/backoff phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Queued,
    WaitingDeps,
    Dispatching,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Retrying,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatus::Completed
                | DispatchStatus::Failed
                | DispatchStatus::Timeout
                | DispatchStatus::Cancelled
        )
    }

    pub fn is_failure_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatus::Failed | DispatchStatus::Timeout | DispatchStatus::Cancelled
        )
    }
}

/// One retry attempt's outcome, appended to `DispatchTask::retry_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub attempt: u32,
    pub error: String,
    pub delay_ms: u64,
    pub at: DateTime<Utc>,
}

/// A [`Task`] plus the bookkeeping the dispatcher needs to drive it through
/// admission, retries, and terminal accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTask {
    pub task: Task,
    pub status: DispatchStatus,
    pub attempts: u32,
    pub retry_history: Vec<RetryRecord>,
    pub queued_at: DateTime<Utc>,
}

impl DispatchTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            status: DispatchStatus::Queued,
            attempts: 0,
            retry_history: Vec::new(),
            queued_at: Utc::now(),
        }
    }

    pub fn record_retry(&mut self, error: impl Into<String>, delay_ms: u64) {
        self.retry_history.push(RetryRecord {
            attempt: self.attempts,
            error: error.into(),
            delay_ms,
            at: Utc::now(),
        });
    }
}
