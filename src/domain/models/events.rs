//! Events published to registered listeners over the lifetime of a swarm run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::task::TaskId;

/// Swarm-level lifecycle events, emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEventKind {
    Started,
    PlanCreated,
    PlanApproved,
    TaskStarted { task_id: TaskId },
    TaskCompleted { task_id: TaskId },
    TaskFailed { task_id: TaskId, error: String },
    ReviewStarted,
    ReviewCompleted,
    Completed,
    Failed { reason: String },
    Cancelled,
}

/// Dispatcher-level lifecycle events, emitted by [`crate::services::dispatcher::Dispatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatcherEventKind {
    Queued { task_id: TaskId },
    Started { task_id: TaskId },
    Completed { task_id: TaskId },
    Failed { task_id: TaskId, error: String },
    Timeout { task_id: TaskId },
    Retry { task_id: TaskId, attempt: u32, max_attempts: u32 },
    Cancelled { task_id: TaskId },
    Paused,
    Resumed,
}

/// Envelope common to both event kinds: `{type, swarmId/taskId, timestamp, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<K> {
    pub swarm_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: K,
    pub data: Value,
}

impl<K> EventEnvelope<K> {
    pub fn new(swarm_id: Uuid, kind: K) -> Self {
        Self {
            swarm_id,
            timestamp: Utc::now(),
            kind,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

pub type SwarmEvent = EventEnvelope<SwarmEventKind>;
pub type DispatcherEvent = EventEnvelope<DispatcherEventKind>;
