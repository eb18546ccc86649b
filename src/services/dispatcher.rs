//! Dispatcher: drives a set of tasks held in a [`TaskGraph`] to terminal
//! state concurrently, with backpressure, retries, and timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DispatchStatus, DispatchTask, Task, TaskId, TaskStatus,
};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::event_bus::EventBus;
use crate::services::subagent_manager::{SpawnConfig, SubagentManager};
use crate::services::task_graph::TaskGraph;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent: u32,
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub dep_timeout_ms: i64,
    pub max_queue_size: usize,
    pub max_turns_per_task: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_timeout_ms: 120_000,
            max_retries: 2,
            retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            dep_timeout_ms: 300_000,
            max_queue_size: 200,
            max_turns_per_task: 25,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub retried: usize,
}

/// `retryDelayMs · backoffMultiplier^(attempt-1)`, clamped to `maxBackoffMs`.
fn backoff_delay_ms(config: &DispatcherConfig, attempt: u32) -> u64 {
    let raw = config.retry_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32 - 1);
    (raw as u64).min(config.max_backoff_ms)
}

pub struct Dispatcher {
    config: DispatcherConfig,
    manager: Arc<SubagentManager>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    events: Arc<EventBus<crate::domain::models::DispatcherEvent>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    stats: RwLock<DispatchStats>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, manager: Arc<SubagentManager>) -> Self {
        Self {
            config,
            manager,
            circuit_breaker: None,
            events: Arc::new(EventBus::new()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stats: RwLock::new(DispatchStats::default()),
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn events(&self) -> &EventBus<crate::domain::models::DispatcherEvent> {
        &self.events
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.publish(crate::domain::models::DispatcherEventKind::Paused, None);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.publish(crate::domain::models::DispatcherEventKind::Resumed, None);
    }

    /// `stop`: idempotent, non-blocking; cancels every queued/waiting task.
    pub fn stop(&self, tasks: &mut HashMap<TaskId, DispatchTask>) {
        self.stopped.store(true, Ordering::SeqCst);
        for task in tasks.values_mut() {
            if !task.status.is_terminal() {
                task.status = DispatchStatus::Cancelled;
                self.publish(crate::domain::models::DispatcherEventKind::Cancelled { task_id: task.task.id }, None);
            }
        }
    }

    fn publish(&self, kind: crate::domain::models::DispatcherEventKind, swarm_id: Option<uuid::Uuid>) {
        let event = crate::domain::models::EventEnvelope::new(swarm_id.unwrap_or_default(), kind);
        self.events.publish(event);
    }

    /// `dispatch`: builds the DispatchTask queue from the graph's current
    /// tasks; rejects oversized batches with backpressure.
    pub fn build_queue(&self, graph: &TaskGraph) -> DomainResult<HashMap<TaskId, DispatchTask>> {
        let tasks: Vec<Task> = graph.tasks().cloned().collect();
        if tasks.len() > self.config.max_queue_size {
            return Err(DomainError::QueueOverflow { requested: tasks.len(), max: self.config.max_queue_size });
        }
        Ok(tasks.into_iter().map(|t| (t.id, DispatchTask::new(t))).collect())
    }

    fn ready_and_pending(
        &self,
        graph: &TaskGraph,
        tasks: &HashMap<TaskId, DispatchTask>,
    ) -> (Vec<TaskId>, usize) {
        let mut ready: Vec<TaskId> = tasks
            .values()
            .filter(|dt| {
                matches!(dt.status, DispatchStatus::Queued | DispatchStatus::WaitingDeps)
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

        let pending = tasks.values().filter(|dt| !dt.status.is_terminal()).count();
        (ready, pending)
    }

    /// Drives every task in `tasks` to a terminal state. `graph` supplies
    /// dependency structure; `tasks` is this dispatcher's owned bookkeeping.
    /// Returns final stats.
    pub async fn run(
        &self,
        graph: &TaskGraph,
        tasks: &mut HashMap<TaskId, DispatchTask>,
    ) -> DispatchStats {
        let mut running = FuturesUnordered::new();
        let mut running_ids: std::collections::HashSet<TaskId> = std::collections::HashSet::new();

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                continue;
            }

            // Dep-failure cascade: propagate before computing ready/pending.
            for id in graph.all_ids() {
                let should_block = tasks.get(&id).is_some_and(|dt| {
                    matches!(dt.status, DispatchStatus::Queued | DispatchStatus::WaitingDeps)
                }) && graph
                    .get(id)
                    .map(|t| &t.depends_on)
                    .into_iter()
                    .flatten()
                    .any(|dep| tasks.get(dep).is_some_and(|d| d.status.is_failure_terminal()));
                if should_block {
                    self.mark_blocked_cascade(tasks, id).await;
                }
            }

            let (ready, pending) = self.ready_and_pending(graph, tasks);
            if pending == 0 && running.is_empty() {
                break;
            }

            let available = self.config.max_concurrent.saturating_sub(running.len() as u32) as usize;
            for id in ready.into_iter().take(available) {
                if running_ids.contains(&id) {
                    continue;
                }
                tasks.get_mut(&id).unwrap().status = DispatchStatus::Dispatching;
                running_ids.insert(id);
                let dispatch_task = tasks[&id].clone();
                let manager = self.manager.clone();
                let circuit_breaker = self.circuit_breaker.clone();
                let config = self.config.clone();
                let events = self.events.clone();
                running.push(Box::pin(async move {
                    let (outcome, dispatch_task) =
                        execute_task(&config, &manager, circuit_breaker.as_deref(), &events, dispatch_task).await;
                    (id, outcome, dispatch_task)
                }));
            }

            if !running.is_empty() {
                if let Some((id, outcome, dispatch_task)) = running.next().await {
                    running_ids.remove(&id);
                    if let Some(entry) = tasks.get_mut(&id) {
                        entry.attempts = dispatch_task.attempts;
                        entry.retry_history = dispatch_task.retry_history;
                    }
                    self.apply_outcome(tasks, id, outcome).await;
                }
                continue;
            }

            if pending > 0 {
                // Possible deadlock: age out stale waiting_deps tasks.
                let now = Utc::now();
                let mut changed = false;
                for dt in tasks.values_mut() {
                    if dt.status == DispatchStatus::WaitingDeps
                        && (now - dt.queued_at).num_milliseconds() > self.config.dep_timeout_ms
                    {
                        dt.status = DispatchStatus::Timeout;
                        changed = true;
                        self.publish(
                            crate::domain::models::DispatcherEventKind::Timeout { task_id: dt.task.id },
                            None,
                        );
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        self.stats.read().await.clone()
    }

    async fn apply_outcome(&self, tasks: &mut HashMap<TaskId, DispatchTask>, id: TaskId, outcome: ExecuteOutcome) {
        let mut stats = self.stats.write().await;
        let entry = match tasks.get_mut(&id) {
            Some(entry) => entry,
            None => return,
        };
        match outcome {
            ExecuteOutcome::Completed(result) => {
                entry.task.result = Some(result);
                entry.task.transition_to(TaskStatus::Completed);
                entry.status = DispatchStatus::Completed;
                stats.completed += 1;
                self.publish(crate::domain::models::DispatcherEventKind::Completed { task_id: id }, None);
            }
            ExecuteOutcome::Failed(error) => {
                entry.task.transition_to(TaskStatus::Failed);
                entry.status = DispatchStatus::Failed;
                stats.failed += 1;
                self.publish(crate::domain::models::DispatcherEventKind::Failed { task_id: id, error }, None);
            }
            ExecuteOutcome::Timeout => {
                entry.task.transition_to(TaskStatus::Failed);
                entry.status = DispatchStatus::Timeout;
                stats.timed_out += 1;
                self.publish(crate::domain::models::DispatcherEventKind::Timeout { task_id: id }, None);
            }
        }
        if !entry.retry_history.is_empty() {
            stats.retried += entry.retry_history.len();
        }
    }

    /// A task whose dependency failed never gets dispatched; stamp it
    /// `Blocked` on the domain `Task` (never `started_at`) and account for
    /// it the same way `apply_outcome` accounts for a genuine failure, so
    /// `DispatchStats.failed` reflects every task that will never complete.
    async fn mark_blocked_cascade(&self, tasks: &mut HashMap<TaskId, DispatchTask>, id: TaskId) {
        let mut stats = self.stats.write().await;
        let entry = match tasks.get_mut(&id) {
            Some(entry) => entry,
            None => return,
        };
        entry.task.transition_to(TaskStatus::Blocked);
        entry.status = DispatchStatus::Failed;
        stats.failed += 1;
        self.publish(
            crate::domain::models::DispatcherEventKind::Failed {
                task_id: id,
                error: "dependency failed".to_string(),
            },
            None,
        );
    }
}

/// `pub(crate)`: reused directly by [`crate::services::coordinator::Coordinator`],
/// which drives its own inline execution loop against this same per-task
/// retry machinery rather than delegating to [`Dispatcher::run`], since the
/// coordinator needs per-task token-budget checks between completions,
/// which a wholesale `Dispatcher::run` call cannot expose.
pub(crate) enum ExecuteOutcome {
    Completed(crate::domain::models::SubResult),
    Failed(String),
    Timeout,
}

/// `executeTask`: a self-contained retry loop. Runs as its own future inside
/// the dispatcher's `FuturesUnordered`, so a backoff sleep here only delays
/// this one task — other in-flight tasks keep making progress. Returns the
/// terminal outcome plus the `DispatchTask` carrying the accumulated attempt
/// count and retry history for the caller to fold back into its bookkeeping.
pub(crate) async fn execute_task(
    config: &DispatcherConfig,
    manager: &SubagentManager,
    circuit_breaker: Option<&CircuitBreaker>,
    events: &EventBus<crate::domain::models::DispatcherEvent>,
    mut dispatch_task: DispatchTask,
) -> (ExecuteOutcome, DispatchTask) {
    loop {
        if let Some(breaker) = circuit_breaker {
            if !breaker.allow(dispatch_task.task.role).await {
                return (ExecuteOutcome::Failed("circuit open for role".to_string()), dispatch_task);
            }
        }

        dispatch_task.attempts += 1;
        let spawn_config = SpawnConfig {
            task: dispatch_task.task.description.clone(),
            tools: dispatch_task.task.required_tools.clone().unwrap_or_default(),
            max_turns: Some(config.max_turns_per_task),
            cwd: String::new(),
            session_id: dispatch_task.task.id.to_string(),
            parent_session_id: None,
            depth: 0,
            role: dispatch_task.task.role,
            timeout_ms: Some(config.default_timeout_ms),
            parent_allowed_tools: None,
        };

        let result = manager.spawn(spawn_config).await;

        if result.success {
            if let Some(breaker) = circuit_breaker {
                breaker.on_success(dispatch_task.task.role).await;
            }
            return (ExecuteOutcome::Completed(result), dispatch_task);
        }
        if result.is_timeout() {
            if let Some(breaker) = circuit_breaker {
                breaker.on_failure(dispatch_task.task.role).await;
            }
            return (ExecuteOutcome::Timeout, dispatch_task);
        }
        if let Some(breaker) = circuit_breaker {
            breaker.on_failure(dispatch_task.task.role).await;
        }

        let error = result.error.unwrap_or_else(|| "unknown error".to_string());
        if dispatch_task.attempts > config.max_retries {
            return (ExecuteOutcome::Failed(error), dispatch_task);
        }

        let delay_ms = backoff_delay_ms(config, dispatch_task.attempts);
        dispatch_task.record_retry(error, delay_ms);
        let event = crate::domain::models::EventEnvelope::new(
            uuid::Uuid::default(),
            crate::domain::models::DispatcherEventKind::Retry {
                task_id: dispatch_task.task.id,
                attempt: dispatch_task.attempts,
                max_attempts: config.max_retries + 1,
            },
        );
        events.publish(event);
        tokio::time::sleep(StdDuration::from_millis(delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_grows_and_clamps() {
        let config = DispatcherConfig { retry_delay_ms: 100, backoff_multiplier: 2.0, max_backoff_ms: 300, ..Default::default() };
        assert_eq!(backoff_delay_ms(&config, 1), 100);
        assert_eq!(backoff_delay_ms(&config, 2), 200);
        assert_eq!(backoff_delay_ms(&config, 3), 300);
        assert_eq!(backoff_delay_ms(&config, 10), 300);
    }

    #[test]
    fn build_queue_rejects_oversized_batch() {
        use crate::domain::ports::RunnerFactory;
        struct Noop;
        #[async_trait::async_trait]
        impl RunnerFactory for Noop {
            async fn create(&self, _c: crate::domain::ports::RunnerConfig) -> DomainResult<Box<dyn crate::domain::ports::Runner>> {
                unreachable!()
            }
        }
        let manager = Arc::new(SubagentManager::new(Default::default(), Arc::new(Noop)));
        let dispatcher = Dispatcher::new(DispatcherConfig { max_queue_size: 1, ..Default::default() }, manager);
        let mut graph = TaskGraph::new();
        graph.add_task(Task::new("a")).unwrap();
        graph.add_task(Task::new("b")).unwrap();
        let err = dispatcher.build_queue(&graph).unwrap_err();
        assert!(matches!(err, DomainError::QueueOverflow { .. }));
    }

    #[tokio::test]
    async fn dependency_failure_cascades_to_blocked_and_counts_as_failed() {
        use crate::domain::models::Role;
        use crate::domain::models::SubResult;
        use crate::domain::ports::{Runner, RunnerConfig, RunnerFactory};

        struct FailsTaskA;

        struct ScriptedRunner {
            config: RunnerConfig,
        }

        #[async_trait::async_trait]
        impl Runner for ScriptedRunner {
            async fn run(&self) -> SubResult {
                if self.config.task.contains("task a") {
                    SubResult::err("worker", "boom")
                } else {
                    SubResult::ok("worker", "done")
                }
            }
            async fn stop(&self) {}
        }

        #[async_trait::async_trait]
        impl RunnerFactory for FailsTaskA {
            async fn create(&self, config: RunnerConfig) -> DomainResult<Box<dyn Runner>> {
                Ok(Box::new(ScriptedRunner { config }))
            }
        }

        let manager = Arc::new(SubagentManager::new(Default::default(), Arc::new(FailsTaskA)));
        let dispatcher = Dispatcher::new(
            DispatcherConfig { max_retries: 0, retry_delay_ms: 1, ..Default::default() },
            manager,
        );

        let mut graph = TaskGraph::new();
        let a = Task::new("task a").with_role(Role::Worker);
        let a_id = a.id;
        graph.add_task(a).unwrap();
        let b = Task::new("task b").with_role(Role::Worker).with_depends_on([a_id]);
        let b_id = b.id;
        graph.add_task(b).unwrap();

        let mut tasks = dispatcher.build_queue(&graph).unwrap();
        let stats = dispatcher.run(&graph, &mut tasks).await;

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 0);

        let blocked = &tasks[&b_id].task;
        assert_eq!(blocked.status, TaskStatus::Blocked);
        assert!(blocked.started_at.is_none());
    }
}
