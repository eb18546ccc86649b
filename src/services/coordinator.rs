//! Coordinator: drives one swarm run end to end.
//!
//! Owns the exclusive [`SwarmState`] for a run and sequences
//! Init → Planning → Approval → Execution → Critic → Aggregation →
//! Terminate. Execution is driven inline against [`TaskGraph`], reusing
//! [`crate::services::dispatcher`]'s per-task retry loop directly rather than
//! delegating the whole phase to [`crate::services::dispatcher::Dispatcher`],
//! since an inline loop is the only way to check the token budget between
//! individual task completions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::{
    DispatchStatus, DispatchTask, EventEnvelope, Plan, Role, SubResult, SwarmEvent,
    SwarmEventKind, SwarmState, SwarmStatus, Task, TaskId, TaskStatus,
};
use crate::domain::ports::{ApprovalCallback, ApprovalDecision, BudgetGate, RunnerFactory, StreamSink};
use crate::services::aggregator::{Aggregator, AggregatorInput};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::critic::{Critic, CriticIssue, FollowUp};
use crate::services::dispatcher::{execute_task, DispatcherConfig, ExecuteOutcome};
use crate::services::event_bus::EventBus;
use crate::services::graph_builder::GraphBuilder;
use crate::services::overseers::CriticContext;
use crate::services::postback::{Postback, PostbackFormat, PostbackMessage, TaskOutcome};
use crate::services::status_provider::StatusProvider;
use crate::services::subagent_manager::{SpawnConfig, SubagentManager};
use crate::services::task_graph::TaskGraph;

/// Swarm-level knobs plus the dispatcher tuning used by the inline
/// execution loop.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub enabled: bool,
    pub max_tasks: usize,
    pub max_depth: u8,
    pub task_timeout_ms: u64,
    /// 0 disables the swarm-wide deadline.
    pub swarm_timeout_ms: u64,
    pub auto_approve: bool,
    pub enable_critic: bool,
    pub max_critic_iterations: u32,
    pub planner_tools: Vec<String>,
    pub worker_tools: Vec<String>,
    pub critic_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
    /// 0 disables the token budget check.
    pub token_budget: u64,
    /// No shared-memory mechanism exists in this crate; carried as a
    /// documented no-op (DESIGN.md open question).
    pub enable_shared_memory: bool,
    pub dispatcher: DispatcherConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tasks: 50,
            max_depth: 3,
            task_timeout_ms: 120_000,
            swarm_timeout_ms: 600_000,
            auto_approve: false,
            enable_critic: false,
            max_critic_iterations: 2,
            planner_tools: Vec::new(),
            worker_tools: Vec::new(),
            critic_tools: Vec::new(),
            forbidden_tools: Vec::new(),
            token_budget: 0,
            enable_shared_memory: false,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// One swarm invocation.
#[derive(Debug, Clone)]
pub struct SwarmInput {
    pub goal: String,
    /// Caller-supplied task descriptions; skips the planner runner entirely
    /// when present.
    pub tasks: Option<Vec<String>>,
    pub auto_approve: Option<bool>,
    pub token_budget: Option<u64>,
    pub session_id: String,
    pub depth: u8,
}

#[derive(Debug, Clone)]
pub struct SwarmResult {
    pub state: SwarmState,
    pub postback: PostbackMessage,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    manager: Arc<SubagentManager>,
    graph_builder: GraphBuilder,
    aggregator: Aggregator,
    critic: Critic,
    postback: Postback,
    status_provider: Arc<StatusProvider>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    budget_gate: Option<Arc<dyn BudgetGate>>,
    stream_sink: Option<Arc<dyn StreamSink>>,
    approval_callback: Option<Arc<dyn ApprovalCallback>>,
    events: Arc<EventBus<SwarmEvent>>,
    dispatcher_events: Arc<EventBus<crate::domain::models::DispatcherEvent>>,
    running: AtomicBool,
    cancelled: AtomicBool,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        manager: Arc<SubagentManager>,
        graph_builder: GraphBuilder,
        aggregator: Aggregator,
        critic: Critic,
        postback: Postback,
    ) -> Self {
        Self {
            config,
            manager,
            graph_builder,
            aggregator,
            critic,
            postback,
            status_provider: Arc::new(StatusProvider::new()),
            circuit_breaker: None,
            budget_gate: None,
            stream_sink: None,
            approval_callback: None,
            events: Arc::new(EventBus::new()),
            dispatcher_events: Arc::new(EventBus::new()),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Wired only into this coordinator's inline execution loop, never also
    /// into the `SubagentManager` passed to `new` — doing both would double
    /// count every spawn against the same per-role state machine.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_budget_gate(mut self, gate: Arc<dyn BudgetGate>) -> Self {
        self.budget_gate = Some(gate);
        self
    }

    pub fn with_stream_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.stream_sink = Some(sink);
        self
    }

    pub fn with_approval_callback(mut self, callback: Arc<dyn ApprovalCallback>) -> Self {
        self.approval_callback = Some(callback);
        self
    }

    pub fn status_provider(&self) -> &Arc<StatusProvider> {
        &self.status_provider
    }

    pub fn events(&self) -> &EventBus<SwarmEvent> {
        &self.events
    }

    /// Idempotent, non-blocking. The in-flight run observes the flag at its
    /// next await point and calls `SubagentManager::stop_all` itself.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[instrument(skip(self, input), fields(goal = %input.goal))]
    pub async fn execute(&self, input: SwarmInput) -> SwarmResult {
        if !self.config.enabled {
            warn!("swarm execution requested while disabled");
            return self.failed_result(SwarmState::new(), "swarm subsystem is disabled");
        }
        if let Some(gate) = &self.budget_gate {
            if gate.is_exceeded().await {
                return self.failed_result(SwarmState::new(), "budget tracker reports overall budget already exceeded");
            }
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return self.failed_result(SwarmState::new(), "another swarm is already running");
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let mut state = SwarmState::new();
        self.publish(SwarmEventKind::Started, state.id);
        self.stream("swarm started").await;

        let mut issues: Vec<CriticIssue> = Vec::new();
        let mut follow_ups: Vec<FollowUp> = Vec::new();

        if self.config.swarm_timeout_ms > 0 {
            tokio::select! {
                result = self.run_phases(&mut state, &input) => {
                    issues = result.0;
                    follow_ups = result.1;
                }
                _ = tokio::time::sleep(StdDuration::from_millis(self.config.swarm_timeout_ms)) => {
                    self.cancelled.store(true, Ordering::SeqCst);
                    self.manager.stop_all().await;
                    state.errors.push(format!(
                        "swarm-wide deadline of {}ms exceeded",
                        self.config.swarm_timeout_ms
                    ));
                    self.stream("swarm deadline exceeded").await;
                }
            }
        } else {
            let result = self.run_phases(&mut state, &input).await;
            issues = result.0;
            follow_ups = result.1;
        }

        self.terminate(&mut state);
        self.running.store(false, Ordering::SeqCst);

        let outcomes = self.build_task_outcomes(&state);
        let postback = self.postback.build(PostbackFormat::Markdown, &state, &outcomes, &issues, &follow_ups);
        info!(
            status = ?state.status,
            completed = state.metrics.completed,
            failed = state.metrics.failed,
            "swarm run finished"
        );
        SwarmResult { state, postback }
    }

    async fn run_phases(&self, state: &mut SwarmState, input: &SwarmInput) -> (Vec<CriticIssue>, Vec<FollowUp>) {
        let Some(graph) = self.plan(state, input).await else {
            state.status = SwarmStatus::Failed;
            return (Vec::new(), Vec::new());
        };
        if self.cancelled.load(Ordering::SeqCst) {
            return (Vec::new(), Vec::new());
        }

        if !self.approve(state, input).await {
            return (Vec::new(), Vec::new());
        }
        self.publish(SwarmEventKind::PlanApproved, state.id);
        self.stream("plan approved, starting execution").await;

        if self.cancelled.load(Ordering::SeqCst) {
            return (Vec::new(), Vec::new());
        }

        state.status = SwarmStatus::Executing;
        self.execute_graph(state, &graph, input).await;

        let (issues, follow_ups) = self.run_critic(state, &graph, input).await;
        self.aggregate_final(state, &graph, input).await;

        (issues, follow_ups)
    }

    // ---- Phase 2: Planning -------------------------------------------

    async fn plan(&self, state: &mut SwarmState, input: &SwarmInput) -> Option<TaskGraph> {
        if let Some(descriptions) = &input.tasks {
            let mut descriptions = descriptions.clone();
            if descriptions.len() > self.config.max_tasks {
                state.errors.push(format!(
                    "caller supplied {} tasks, truncating to maxTasks {}",
                    descriptions.len(),
                    self.config.max_tasks
                ));
                descriptions.truncate(self.config.max_tasks);
            }
            let graph = self.graph_builder.build_from_task_list(descriptions).ok()?;
            state.plan = Some(Plan::new(input.goal.clone(), graph.tasks().cloned().collect()));
            self.publish(SwarmEventKind::PlanCreated, state.id);
            return Some(graph);
        }

        state.status = SwarmStatus::Planning;
        self.stream(&format!("planning for goal: {}", input.goal)).await;

        let spawn_config = SpawnConfig {
            task: format!("{}\n\nGoal: {}", Role::Planner.system_prompt(), input.goal),
            tools: self.config.planner_tools.clone(),
            max_turns: None,
            cwd: String::new(),
            session_id: input.session_id.clone(),
            parent_session_id: None,
            depth: input.depth,
            role: Role::Planner,
            timeout_ms: Some(self.config.task_timeout_ms),
            parent_allowed_tools: None,
        };
        let result = self.spawn_guarded(spawn_config).await;

        let graph = match result.result.filter(|_| result.success) {
            Some(text) => self
                .graph_builder
                .parse_planner_output(&text)
                .and_then(|parsed| self.graph_builder.build_from_planner_output(&parsed))
                .unwrap_or_else(|e| {
                    state.errors.push(format!("planner output parse failed, falling back to single task: {e}"));
                    self.graph_builder
                        .build_from_task_list(vec![input.goal.clone()])
                        .expect("single-task fallback never exceeds maxTasks")
                }),
            None => {
                state.errors.push(result.error.unwrap_or_else(|| "planner produced no output".to_string()));
                self.graph_builder
                    .build_from_task_list(vec![input.goal.clone()])
                    .expect("single-task fallback never exceeds maxTasks")
            }
        };

        state.plan = Some(Plan::new(input.goal.clone(), graph.tasks().cloned().collect()));
        self.publish(SwarmEventKind::PlanCreated, state.id);
        Some(graph)
    }

    // ---- Phase 3: Approval --------------------------------------------

    async fn approve(&self, state: &mut SwarmState, input: &SwarmInput) -> bool {
        let auto_approve = input.auto_approve.unwrap_or(self.config.auto_approve);
        if auto_approve {
            if let Some(plan) = &mut state.plan {
                plan.approve();
            }
            return true;
        }

        let Some(callback) = &self.approval_callback else {
            state.errors.push("no approval callback registered and autoApprove is false".to_string());
            return false;
        };
        let Some(plan) = state.plan.clone() else { return false };

        match callback.decide(&plan).await {
            ApprovalDecision::Approve => {
                if let Some(p) = &mut state.plan {
                    p.approve();
                }
                true
            }
            ApprovalDecision::Abort => false,
            ApprovalDecision::Edit(tasks) => {
                if let Some(p) = &mut state.plan {
                    p.replace_tasks(tasks);
                    p.approve();
                    state.metrics.replans += 1;
                }
                true
            }
        }
    }

    // ---- Phase 4: Execution --------------------------------------------

    async fn execute_graph(&self, state: &mut SwarmState, graph: &TaskGraph, input: &SwarmInput) {
        let mut tasks: HashMap<TaskId, DispatchTask> =
            graph.tasks().cloned().map(|t| (t.id, DispatchTask::new(t))).collect();
        let token_budget = input.token_budget.unwrap_or(self.config.token_budget);

        let mut running = FuturesUnordered::new();
        let mut running_ids: std::collections::HashSet<TaskId> = std::collections::HashSet::new();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                self.manager.stop_all().await;
                break;
            }

            for id in graph.all_ids() {
                if let Some(dt) = tasks.get(&id) {
                    if matches!(dt.status, DispatchStatus::Queued) {
                        let failed_dep = graph
                            .get(id)
                            .map(|t| &t.depends_on)
                            .into_iter()
                            .flatten()
                            .any(|dep| tasks.get(dep).is_some_and(|d| d.status.is_failure_terminal()));
                        if failed_dep {
                            self.mark_blocked(state, &mut tasks, id);
                        }
                    }
                }
            }

            let pending = tasks.values().filter(|dt| !dt.status.is_terminal()).count();
            if pending == 0 && running.is_empty() {
                break;
            }

            let mut ready: Vec<TaskId> = tasks
                .values()
                .filter(|dt| {
                    matches!(dt.status, DispatchStatus::Queued)
                        && graph
                            .get(dt.task.id)
                            .map(|t| &t.depends_on)
                            .into_iter()
                            .flatten()
                            .all(|dep| tasks.get(dep).is_some_and(|d| d.status == DispatchStatus::Completed))
                })
                .map(|dt| dt.task.id)
                .collect();
            ready.sort_by_key(|id| tasks[id].task.priority);

            let available = self.config.dispatcher.max_concurrent.saturating_sub(running.len() as u32) as usize;
            for id in ready.into_iter().take(available) {
                if running_ids.contains(&id) {
                    continue;
                }
                tasks.get_mut(&id).unwrap().status = DispatchStatus::Dispatching;
                running_ids.insert(id);
                let dispatch_task = tasks[&id].clone();
                self.publish(SwarmEventKind::TaskStarted { task_id: id }, state.id);

                let manager = self.manager.clone();
                let circuit_breaker = self.circuit_breaker.clone();
                let dispatcher_config = self.config.dispatcher.clone();
                let events = self.dispatcher_events.clone();
                running.push(Box::pin(async move {
                    let (outcome, dispatch_task) =
                        execute_task(&dispatcher_config, &manager, circuit_breaker.as_deref(), &events, dispatch_task)
                            .await;
                    (id, outcome, dispatch_task)
                }));
            }

            if running.is_empty() {
                // Nothing ready, nothing in flight, but work remains: the
                // graph can't make further progress (should not happen for
                // an acyclic graph whose only blocking cause is dependency
                // failure, which the cascade above already drains).
                for dt in tasks.values_mut() {
                    if !dt.status.is_terminal() {
                        dt.status = DispatchStatus::Failed;
                        dt.task.transition_to(TaskStatus::Blocked);
                    }
                }
                break;
            }

            if let Some((id, outcome, dispatch_task)) = running.next().await {
                running_ids.remove(&id);
                if let Some(entry) = tasks.get_mut(&id) {
                    entry.attempts = dispatch_task.attempts;
                    entry.retry_history = dispatch_task.retry_history;
                }
                self.apply_task_outcome(state, &mut tasks, id, outcome).await;

                if token_budget > 0 && state.metrics.tokens_used >= token_budget {
                    state.budget_exceeded = true;
                    state
                        .errors
                        .push(format!("token budget {token_budget} reached; stopping execution"));
                    self.manager.stop_all().await;
                    break;
                }
            }
        }

        if let Some(plan) = &mut state.plan {
            plan.tasks = graph.all_ids().filter_map(|id| tasks.get(&id).map(|dt| dt.task.clone())).collect();
        }
    }

    async fn apply_task_outcome(
        &self,
        state: &mut SwarmState,
        tasks: &mut HashMap<TaskId, DispatchTask>,
        id: TaskId,
        outcome: ExecuteOutcome,
    ) {
        match outcome {
            ExecuteOutcome::Completed(result) => {
                state.metrics.tokens_used += result.tokens_used.unwrap_or(0);
                state.metrics.tool_calls += result.tool_calls as u64;
                state.metrics.llm_calls += 1;
                state.metrics.completed += 1;
                if let Some(entry) = tasks.get_mut(&id) {
                    entry.task.result = Some(result.clone());
                    entry.task.transition_to(TaskStatus::Completed);
                    entry.status = DispatchStatus::Completed;
                    self.status_provider.update_task(entry.task.clone()).await;
                }
                state.task_results.insert(id, result.clone());
                self.publish(SwarmEventKind::TaskCompleted { task_id: id }, state.id);
                if let Some(gate) = &self.budget_gate {
                    gate.record_tokens(result.tokens_used.unwrap_or(0)).await;
                }
            }
            ExecuteOutcome::Failed(error) => {
                self.mark_task_failure(state, tasks, id, DispatchStatus::Failed, error).await;
            }
            ExecuteOutcome::Timeout => {
                self.mark_task_failure(
                    state,
                    tasks,
                    id,
                    DispatchStatus::Timeout,
                    format!("timed out after {}s", self.config.task_timeout_ms / 1000),
                )
                .await;
            }
        }
        state.metrics.total_tasks = tasks.len();
    }

    fn mark_blocked(&self, state: &mut SwarmState, tasks: &mut HashMap<TaskId, DispatchTask>, id: TaskId) {
        if let Some(entry) = tasks.get_mut(&id) {
            entry.task.transition_to(TaskStatus::Blocked);
            entry.status = DispatchStatus::Failed;
        }
        state.errors.push(format!("task {id} blocked: dependency failed"));
        self.publish(SwarmEventKind::TaskFailed { task_id: id, error: "dependency failed".to_string() }, state.id);
    }

    async fn mark_task_failure(
        &self,
        state: &mut SwarmState,
        tasks: &mut HashMap<TaskId, DispatchTask>,
        id: TaskId,
        dispatch_status: DispatchStatus,
        error: String,
    ) {
        if let Some(entry) = tasks.get_mut(&id) {
            entry.task.transition_to(TaskStatus::Failed);
            entry.status = dispatch_status;
            self.status_provider.update_task(entry.task.clone()).await;
        }
        state.metrics.failed += 1;
        state.task_results.insert(id, SubResult::err(id.to_string(), error.clone()));
        state.errors.push(format!("task {id}: {error}"));
        self.publish(SwarmEventKind::TaskFailed { task_id: id, error }, state.id);
    }

    // ---- Phase 5: Critic ------------------------------------------------

    async fn run_critic(
        &self,
        state: &mut SwarmState,
        graph: &TaskGraph,
        input: &SwarmInput,
    ) -> (Vec<CriticIssue>, Vec<FollowUp>) {
        if !self.config.enable_critic || self.cancelled.load(Ordering::SeqCst) || state.budget_exceeded {
            return (Vec::new(), Vec::new());
        }
        state.status = SwarmStatus::Reviewing;
        self.publish(SwarmEventKind::ReviewStarted, state.id);
        self.stream("critic review started").await;

        let all_task_ids: Vec<TaskId> = graph.all_ids().collect();
        let mut issues: Vec<CriticIssue> = Vec::new();
        let mut follow_ups: Vec<FollowUp> = Vec::new();

        for iteration in 0..self.config.max_critic_iterations.max(1) {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            let inputs = self.aggregator_inputs(state, graph);
            let aggregated = self.aggregator.aggregate(&inputs);
            let sections = aggregated.as_critic_sections();
            let ctx = CriticContext {
                confidence: aggregated.confidence,
                total_tasks: graph.len(),
                failed_tasks: aggregated.failed_tasks,
                conflict_count: aggregated.conflict_count,
                content: &aggregated.content,
                sections: &sections,
                all_task_ids: &all_task_ids,
            };

            let task_summary = if issues.is_empty() {
                "no prior unresolved issues".to_string()
            } else {
                format!(
                    "{} unresolved issue(s) from the previous pass: {}",
                    issues.len(),
                    issues.iter().map(|i| i.message.clone()).collect::<Vec<_>>().join("; ")
                )
            };

            let review = match self.critic.review(&input.goal, &task_summary, &ctx, &input.session_id, input.depth).await {
                Ok(review) => review,
                Err(e) => {
                    state.errors.push(format!("critic review failed on iteration {iteration}: {e}"));
                    break;
                }
            };

            issues = review.issues;
            follow_ups = review.follow_ups;
            if review.approved || issues.is_empty() {
                break;
            }
        }

        state.unresolved_issues = issues.iter().filter_map(|i| serde_json::to_value(i).ok()).collect();
        self.publish(SwarmEventKind::ReviewCompleted, state.id);
        self.stream("critic review completed").await;
        (issues, follow_ups)
    }

    // ---- Phase 6: Aggregation ------------------------------------------

    async fn aggregate_final(&self, state: &mut SwarmState, graph: &TaskGraph, input: &SwarmInput) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        state.status = SwarmStatus::Aggregating;

        let inputs = self.aggregator_inputs(state, graph);
        let aggregated = self.aggregator.aggregate(&inputs);

        let spawn_config = SpawnConfig {
            task: format!(
                "{}\n\nGoal: {}\n\nSynthesized subtask output:\n{}",
                Role::Aggregator.system_prompt(),
                input.goal,
                aggregated.content
            ),
            tools: Vec::new(),
            max_turns: None,
            cwd: String::new(),
            session_id: input.session_id.clone(),
            parent_session_id: None,
            depth: input.depth,
            role: Role::Aggregator,
            timeout_ms: Some(self.config.task_timeout_ms),
            parent_allowed_tools: None,
        };
        let result = self.spawn_guarded(spawn_config).await;
        state.final_result = Some(if result.success {
            result.result.unwrap_or(aggregated.content)
        } else {
            aggregated.content
        });
    }

    fn aggregator_inputs(&self, state: &SwarmState, graph: &TaskGraph) -> Vec<AggregatorInput> {
        graph
            .tasks()
            .enumerate()
            .filter_map(|(order, task)| {
                state
                    .task_results
                    .get(&task.id)
                    .map(|result| AggregatorInput { task_id: task.id, result: result.clone(), order: order as u32 })
            })
            .collect()
    }

    // ---- Phase 7: Terminate ---------------------------------------------

    fn terminate(&self, state: &mut SwarmState) {
        state.ended_at = Some(Utc::now());
        if self.cancelled.load(Ordering::SeqCst) {
            state.status = SwarmStatus::Cancelled;
            self.publish(SwarmEventKind::Cancelled, state.id);
        } else if state.budget_exceeded || state.metrics.failed > 0 {
            state.status = SwarmStatus::Failed;
            let reason = if state.budget_exceeded {
                "token budget exceeded".to_string()
            } else {
                "one or more tasks failed".to_string()
            };
            self.publish(SwarmEventKind::Failed { reason }, state.id);
        } else {
            state.status = SwarmStatus::Completed;
            self.publish(SwarmEventKind::Completed, state.id);
        }
    }

    // ---- helpers ---------------------------------------------------------

    /// Spawns through the circuit breaker this coordinator owns (planner and
    /// aggregator runners don't pass through the dispatcher's retry loop,
    /// so they need their own admission/accounting call here).
    async fn spawn_guarded(&self, spawn_config: SpawnConfig) -> SubResult {
        let role = spawn_config.role;
        if let Some(breaker) = &self.circuit_breaker {
            if !breaker.allow(role).await {
                return SubResult::err("circuit", "circuit open for role");
            }
        }
        let result = self.manager.spawn(spawn_config).await;
        if let Some(breaker) = &self.circuit_breaker {
            if result.success {
                breaker.on_success(role).await;
            } else {
                breaker.on_failure(role).await;
            }
        }
        result
    }

    fn build_task_outcomes(&self, state: &SwarmState) -> Vec<TaskOutcome> {
        state
            .plan
            .as_ref()
            .map(|p| {
                p.tasks
                    .iter()
                    .map(|t| {
                        let result = state.task_results.get(&t.id);
                        TaskOutcome {
                            task_id: t.id,
                            description: t.description.clone(),
                            succeeded: result.is_some_and(|r| r.success),
                            summary: result.and_then(|r| r.result.clone()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&self, kind: SwarmEventKind, swarm_id: Uuid) {
        self.events.publish(EventEnvelope::new(swarm_id, kind));
    }

    async fn stream(&self, text: &str) {
        if let Some(sink) = &self.stream_sink {
            sink.write(text).await;
        }
    }

    fn failed_result(&self, mut state: SwarmState, reason: &str) -> SwarmResult {
        state.status = SwarmStatus::Failed;
        state.errors.push(reason.to_string());
        state.ended_at = Some(Utc::now());
        let postback = self.postback.build(PostbackFormat::Structured, &state, &[], &[], &[]);
        SwarmResult { state, postback }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainResult;
    use crate::domain::ports::{Runner, RunnerConfig};
    use crate::services::aggregator::AggregatorConfig;
    use crate::services::critic::CriticConfig;
    use crate::services::graph_builder::GraphBuilderConfig;
    use crate::services::postback::PostbackConfig;
    use crate::services::subagent_manager::SubagentManagerConfig;
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    struct EchoRunner {
        config: RunnerConfig,
    }

    #[async_trait]
    impl Runner for EchoRunner {
        async fn run(&self) -> SubResult {
            SubResult::ok("echo", format!("did: {}", self.config.task)).with_tokens(10)
        }
        async fn stop(&self) {}
    }

    #[async_trait]
    impl RunnerFactory for AlwaysSucceeds {
        async fn create(&self, config: RunnerConfig) -> DomainResult<Box<dyn Runner>> {
            Ok(Box::new(EchoRunner { config }))
        }
    }

    /// Planner emits A -> B -> C; the worker fails exactly task "b".
    struct PlannerThenFailB;

    struct ScriptedRunner {
        config: RunnerConfig,
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run(&self) -> SubResult {
            match self.config.role {
                Role::Planner => SubResult::ok(
                    "planner",
                    r#"{"tasks":[
                        {"id":"a","description":"task a"},
                        {"id":"b","description":"task b","dependsOn":["a"]},
                        {"id":"c","description":"task c","dependsOn":["b"]}
                    ]}"#,
                ),
                Role::Worker if self.config.task.contains("task b") => SubResult::err("worker", "boom"),
                Role::Worker => SubResult::ok("worker", "done").with_tokens(5),
                Role::Aggregator => SubResult::ok("aggregator", "synthesized"),
                Role::Critic => SubResult::ok(
                    "critic",
                    r#"{"approved":true,"qualityScore":0.9,"issues":[],"summary":"ok","feedback":""}"#,
                ),
            }
        }
        async fn stop(&self) {}
    }

    #[async_trait]
    impl RunnerFactory for PlannerThenFailB {
        async fn create(&self, config: RunnerConfig) -> DomainResult<Box<dyn Runner>> {
            Ok(Box::new(ScriptedRunner { config }))
        }
    }

    fn fast_dispatcher_config() -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent: 3,
            max_retries: 0,
            retry_delay_ms: 1,
            backoff_multiplier: 1.0,
            max_backoff_ms: 1,
            default_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    fn test_coordinator(factory: Arc<dyn RunnerFactory>, auto_approve: bool) -> Coordinator {
        let manager = Arc::new(SubagentManager::new(SubagentManagerConfig::default(), factory));
        Coordinator::new(
            CoordinatorConfig { auto_approve, dispatcher: fast_dispatcher_config(), ..Default::default() },
            manager,
            GraphBuilder::new(GraphBuilderConfig::default()),
            Aggregator::new(AggregatorConfig::default()),
            Critic::new(CriticConfig::default()),
            Postback::new(PostbackConfig::default()),
        )
    }

    fn input(goal: &str, tasks: Option<Vec<String>>) -> SwarmInput {
        SwarmInput {
            goal: goal.to_string(),
            tasks,
            auto_approve: None,
            token_budget: None,
            session_id: "s".to_string(),
            depth: 0,
        }
    }

    #[tokio::test]
    async fn happy_path_three_independent_tasks_completes() {
        let coordinator = test_coordinator(Arc::new(AlwaysSucceeds), true);
        let result = coordinator
            .execute(input("ship it", Some(vec!["a".into(), "b".into(), "c".into()])))
            .await;
        assert_eq!(result.state.status, SwarmStatus::Completed);
        assert_eq!(result.state.metrics.completed, 3);
        assert_eq!(result.state.metrics.failed, 0);
        assert!(result.state.final_result.is_some());
    }

    #[tokio::test]
    async fn dependency_chain_failure_blocks_downstream_and_fails_swarm() {
        let coordinator = test_coordinator(Arc::new(PlannerThenFailB), true);
        let result = coordinator.execute(input("build the thing", None)).await;

        assert_eq!(result.state.status, SwarmStatus::Failed);
        assert_eq!(result.state.metrics.completed, 1);
        assert_eq!(result.state.metrics.failed, 1);

        let plan = result.state.plan.expect("plan was built");
        let c = plan.tasks.iter().find(|t| t.description == "task c").unwrap();
        assert_eq!(c.status, TaskStatus::Blocked);
        assert!(c.started_at.is_none());
    }

    #[tokio::test]
    async fn disabled_coordinator_refuses_immediately() {
        let manager = Arc::new(SubagentManager::new(SubagentManagerConfig::default(), Arc::new(AlwaysSucceeds)));
        let coordinator = Coordinator::new(
            CoordinatorConfig { enabled: false, ..Default::default() },
            manager,
            GraphBuilder::new(GraphBuilderConfig::default()),
            Aggregator::new(AggregatorConfig::default()),
            Critic::new(CriticConfig::default()),
            Postback::new(PostbackConfig::default()),
        );
        let result = coordinator.execute(input("goal", Some(vec!["a".into()]))).await;
        assert_eq!(result.state.status, SwarmStatus::Failed);
        assert!(result.state.errors.iter().any(|e| e.contains("disabled")));
    }

    #[tokio::test]
    async fn token_budget_stops_execution_before_every_task_runs() {
        let manager = Arc::new(SubagentManager::new(SubagentManagerConfig::default(), Arc::new(AlwaysSucceeds)));
        let coordinator = Coordinator::new(
            CoordinatorConfig {
                auto_approve: true,
                token_budget: 12,
                dispatcher: DispatcherConfig { max_concurrent: 1, ..fast_dispatcher_config() },
                ..Default::default()
            },
            manager,
            GraphBuilder::new(GraphBuilderConfig::default()),
            Aggregator::new(AggregatorConfig::default()),
            Critic::new(CriticConfig::default()),
            Postback::new(PostbackConfig::default()),
        );
        let result = coordinator
            .execute(input("goal", Some(vec!["a".into(), "b".into(), "c".into()])))
            .await;

        assert!(result.state.budget_exceeded);
        assert_eq!(result.state.status, SwarmStatus::Failed);
        assert!(result.state.metrics.completed < 3);
    }
}
