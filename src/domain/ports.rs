//! Ports: traits this crate *consumes* from the outside world.
//!
//! None of these are implemented here — the language-model client, the
//! tool registry, and the capability/budget/guardrail adapters are external
//! collaborators. Production callers supply concrete implementations; tests
//! supply fakes.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::DomainResult;
use super::models::{Plan, Role, SubResult, Task};

/// Configuration handed to [`RunnerFactory::create`] for one subagent spawn.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub task: String,
    pub tools: Vec<String>,
    pub max_turns: u32,
    pub cwd: String,
    pub session_id: String,
    /// Depth of the subagent about to be created (parent depth + 1).
    pub depth: u8,
    pub role: Role,
}

/// One running (or about-to-run) agent invocation.
///
/// `run` may suspend for an arbitrary amount of time; `stop` must be
/// idempotent, non-blocking, and safe to call concurrently with an
/// in-flight `run` (implementations use interior mutability — e.g. an
/// internal cancellation flag `run` polls) so [`crate::services::subagent_manager::SubagentManager`]
/// can hold a shared handle for out-of-band cancellation.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self) -> SubResult;
    async fn stop(&self);
}

/// Produces a [`Runner`] for a given [`RunnerConfig`]. Abstracts over the
/// prompt + tool-call loop entirely — out of scope for this crate.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn create(&self, config: RunnerConfig) -> DomainResult<Box<dyn Runner>>;
}

/// The two lifecycle events a [`Hook`] may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    SubagentStart,
    SubagentStop,
}

/// Input passed to a hook at either lifecycle point.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub event: HookEvent,
    pub session_id: String,
    pub cwd: String,
    pub subagent_id: String,
    pub parent_session_id: Option<String>,
    pub task: String,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub depth: u8,
    /// Populated only on `SubagentStop`.
    pub status: Option<String>,
    pub result: Option<SubResult>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// What a hook may request of the caller. `None` fields mean "no change."
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    /// `Some(false)` vetoes the spawn (on start) or blocks the result (on stop).
    pub continue_: Option<bool>,
    pub stop_reason: Option<String>,
    pub updated_allowed_tools: Option<Vec<String>>,
    pub updated_result: Option<SubResult>,
    pub additional_context: Option<String>,
}

impl HookOutput {
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self {
            continue_: Some(false),
            stop_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_veto(&self) -> bool {
        self.continue_ == Some(false)
    }
}

/// A single named hook. Absence of a hook for an event means "skip": hook
/// points are explicit capability values, not always-present struct fields.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    async fn fire(&self, input: &HookInput) -> Option<HookOutput>;
}

/// Tool registry: lists available tools and the parent session's allowed set.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn list_tools(&self) -> Vec<String>;
    /// `None` means unrestricted (no narrowing from the parent).
    async fn parent_allowed_tools(&self) -> Option<Vec<String>>;
}

/// Capability gate consulted by the Enforcer.
#[async_trait]
pub trait CapabilityGate: Send + Sync {
    async fn can_spawn_subagent(&self, session_id: &str) -> bool;
}

/// Budget gate consulted by the Enforcer and the Coordinator.
#[async_trait]
pub trait BudgetGate: Send + Sync {
    async fn is_exceeded(&self) -> bool;
    async fn record_tokens(&self, tokens: u64);
}

/// Guardrail gate: denies specific tools/policies outright.
#[async_trait]
pub trait GuardrailGate: Send + Sync {
    async fn denies_spawn_tool(&self) -> bool;
}

/// Streamed narrative sink the Coordinator writes to. Kept maximally
/// simple: one text event at a time, best-effort.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn write(&self, text: &str);
}

/// What the approval step may decide once a plan has been produced and
/// `autoApprove` is `false`.
#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    /// Approve the plan as-is.
    Approve,
    /// Abort the run; the swarm ends `cancelled`.
    Abort,
    /// Replace the plan's tasks before approving (bumps the plan version).
    Edit(Vec<Task>),
}

/// Injected human-in-the-loop (or policy) gate between planning and
/// execution. Never invoked when `autoApprove` is set.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn decide(&self, plan: &Plan) -> ApprovalDecision;
}

/// Envelope suitable for hand-off to an external inbox subsystem. The
/// inbox subsystem itself is out of scope; this is just the shape a caller
/// would persist or forward.
#[async_trait]
pub trait InboxSink: Send + Sync {
    async fn deliver(&self, envelope: Value) -> DomainResult<()>;
}
