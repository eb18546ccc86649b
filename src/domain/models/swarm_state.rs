//! [`SwarmState`] — the coordinator's exclusively-owned run state.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::plan::Plan;
use super::sub_result::SubResult;
use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Idle,
    Planning,
    Executing,
    Reviewing,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

/// Running totals the coordinator updates at documented points only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmMetrics {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub tokens_used: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub replans: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmState {
    pub id: Uuid,
    pub status: SwarmStatus,
    pub plan: Option<Plan>,
    pub task_results: HashMap<TaskId, SubResult>,
    pub active_agents: HashSet<String>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_result: Option<String>,
    pub metrics: SwarmMetrics,
    /// Set once a token budget is hit mid-execution; distinguishes a
    /// budget-class stop from an ordinary task failure.
    pub budget_exceeded: bool,
    /// Critic findings from the last review iteration, kept as opaque JSON
    /// so the domain layer does not depend on the critic service's types.
    pub unresolved_issues: Vec<Value>,
}

impl SwarmState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SwarmStatus::Idle,
            plan: None,
            task_results: HashMap::new(),
            active_agents: HashSet::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            final_result: None,
            metrics: SwarmMetrics::default(),
            budget_exceeded: false,
            unresolved_issues: Vec::new(),
        }
    }
}

impl Default for SwarmState {
    fn default() -> Self {
        Self::new()
    }
}
