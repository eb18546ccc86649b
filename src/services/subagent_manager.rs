//! Subagent Manager: spawns and stops individual runners, enforcing
//! depth, concurrency, tool-capability inheritance, and per-task timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::models::{Role, SubResult};
use crate::domain::ports::{
    Hook, HookEvent, HookInput, Runner, RunnerConfig, RunnerFactory,
};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::hook_registry::HookRegistry;

#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub task: String,
    pub tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub cwd: String,
    pub session_id: String,
    pub parent_session_id: Option<String>,
    pub depth: u8,
    pub role: Role,
    pub timeout_ms: Option<u64>,
    pub parent_allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SubagentManagerConfig {
    pub max_depth: u8,
    pub max_concurrent: u32,
    pub max_turns: u32,
    pub default_timeout_ms: u64,
    pub default_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
    pub spawn_capable_tools: Vec<String>,
    pub job_poll_interval_ms: u64,
}

impl Default for SubagentManagerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_concurrent: 10,
            max_turns: 25,
            default_timeout_ms: 120_000,
            default_tools: Vec::new(),
            forbidden_tools: Vec::new(),
            spawn_capable_tools: vec!["spawn_subagent".to_string()],
            job_poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

struct AsyncJob {
    status: RwLock<JobStatus>,
    result: RwLock<Option<SubResult>>,
}

pub struct SubagentManager {
    config: SubagentManagerConfig,
    runner_factory: Arc<dyn RunnerFactory>,
    hooks: Arc<HookRegistry>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    active_count: AtomicU32,
    active_runners: RwLock<HashMap<String, Arc<dyn Runner>>>,
    jobs: RwLock<HashMap<Uuid, Arc<AsyncJob>>>,
}

fn effective_tools(
    requested: &[String],
    forbidden: &[String],
    spawn_capable: &[String],
    depth: u8,
    max_depth: u8,
    parent_allowed: Option<&[String]>,
) -> Vec<String> {
    let mut tools: Vec<String> = requested.iter().filter(|t| !forbidden.contains(t)).cloned().collect();
    if depth >= max_depth.saturating_sub(1) {
        tools.retain(|t| !spawn_capable.contains(t));
    }
    if let Some(allowed) = parent_allowed {
        tools.retain(|t| allowed.contains(t));
    }
    tools
}

impl SubagentManager {
    pub fn new(config: SubagentManagerConfig, runner_factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            config,
            runner_factory,
            hooks: Arc::new(HookRegistry::new()),
            circuit_breaker: None,
            active_count: AtomicU32::new(0),
            active_runners: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub async fn register_hook(&self, event: HookEvent, hook: Arc<dyn Hook>) {
        self.hooks.register(event, hook).await;
    }

    /// Admission, pre-hook, tool filtering, turn clamp, timed execution,
    /// post-hook, guaranteed cleanup — in that order.
    pub async fn spawn(&self, config: SpawnConfig) -> SubResult {
        let subagent_id = Uuid::new_v4().to_string();

        if config.depth >= self.config.max_depth {
            return SubResult::err(&subagent_id, "max depth");
        }
        if self.active_count.load(Ordering::SeqCst) >= self.config.max_concurrent {
            return SubResult::err(&subagent_id, "max concurrent subagents");
        }
        if let Some(breaker) = &self.circuit_breaker {
            if !breaker.allow(config.role).await {
                return SubResult::err(&subagent_id, "circuit open for role");
            }
        }

        let start_input = HookInput {
            event: HookEvent::SubagentStart,
            session_id: config.session_id.clone(),
            cwd: config.cwd.clone(),
            subagent_id: subagent_id.clone(),
            parent_session_id: config.parent_session_id.clone(),
            task: config.task.clone(),
            allowed_tools: config.tools.clone(),
            max_turns: config.max_turns.unwrap_or(self.config.max_turns),
            depth: config.depth,
            status: None,
            result: None,
            error: None,
            duration_ms: None,
        };
        let start_outcome = self.hooks.fire_start(&start_input).await;
        if let Some(reason) = start_outcome.veto {
            return SubResult::err(&subagent_id, format!("blocked by hook: {reason}"));
        }

        let tools = effective_tools(
            start_outcome.updated_allowed_tools.as_deref().unwrap_or(&config.tools),
            &self.config.forbidden_tools,
            &self.config.spawn_capable_tools,
            config.depth,
            self.config.max_depth,
            config.parent_allowed_tools.as_deref(),
        );
        let max_turns = config.max_turns.unwrap_or(self.config.max_turns).min(self.config.max_turns);

        self.active_count.fetch_add(1, Ordering::SeqCst);
        let result = self
            .run_with_timeout(&subagent_id, config.clone(), tools, max_turns)
            .await;
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.active_runners.write().await.remove(&subagent_id);

        if let Some(breaker) = &self.circuit_breaker {
            if result.success {
                breaker.on_success(config.role).await;
            } else {
                breaker.on_failure(config.role).await;
            }
        }

        let stop_input = HookInput {
            event: HookEvent::SubagentStop,
            status: Some(if result.success { "completed".to_string() } else { "failed".to_string() }),
            result: Some(result.clone()),
            error: result.error.clone(),
            ..start_input
        };
        let stop_outcome = self.hooks.fire_stop(&stop_input).await;
        if let Some(reason) = stop_outcome.veto {
            return SubResult::err(&subagent_id, format!("result blocked by hook: {reason}"));
        }
        stop_outcome.updated_result.unwrap_or(result)
    }

    async fn run_with_timeout(
        &self,
        subagent_id: &str,
        config: SpawnConfig,
        tools: Vec<String>,
        max_turns: u32,
    ) -> SubResult {
        let timeout_ms = config.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let runner_config = RunnerConfig {
            task: config.task,
            tools,
            max_turns,
            cwd: config.cwd,
            session_id: config.session_id,
            depth: config.depth + 1,
            role: config.role,
        };

        let runner: Arc<dyn Runner> = match self.runner_factory.create(runner_config).await {
            Ok(r) => Arc::from(r),
            Err(e) => return SubResult::err(subagent_id, e.to_string()),
        };
        self.active_runners.write().await.insert(subagent_id.to_string(), runner.clone());

        match tokio::time::timeout(StdDuration::from_millis(timeout_ms), runner.run()).await {
            Ok(result) => result,
            Err(_) => {
                runner.stop().await;
                SubResult::timeout(subagent_id, timeout_ms / 1000)
            }
        }
    }

    /// `stopSubagent`: idempotent. A missing id (already finished, or never
    /// existed) is not an error.
    pub async fn stop_subagent(&self, subagent_id: &str) {
        if let Some(runner) = self.active_runners.read().await.get(subagent_id) {
            runner.stop().await;
        }
    }

    /// Signals every currently-active runner; does not wait for them to
    /// settle — that is the caller's responsibility, since cancellation is
    /// cooperative.
    pub async fn stop_all(&self) {
        let runners: Vec<Arc<dyn Runner>> = self.active_runners.read().await.values().cloned().collect();
        for runner in runners {
            runner.stop().await;
        }
    }

    /// `spawnAsync`: synchronous admission (depth/concurrency), then runs
    /// `spawn` in the background and tracks it under a job id. Requires an
    /// `Arc<SubagentManager>` so the background task can hold its own
    /// owned handle back to the manager.
    pub async fn spawn_async(self: &Arc<Self>, config: SpawnConfig) -> Uuid {
        let job_id = Uuid::new_v4();
        let job = Arc::new(AsyncJob {
            status: RwLock::new(JobStatus::Running),
            result: RwLock::new(None),
        });
        self.jobs.write().await.insert(job_id, job.clone());

        if config.depth >= self.config.max_depth
            || self.active_count.load(Ordering::SeqCst) >= self.config.max_concurrent
        {
            *job.status.write().await = JobStatus::Failed;
            *job.result.write().await = Some(SubResult::err(job_id.to_string(), "admission refused"));
            return job_id;
        }

        let manager = self.clone();
        let _: JoinHandle<()> = tokio::spawn(async move {
            let result = manager.spawn(config).await;
            *job.status.write().await = if result.success { JobStatus::Completed } else { JobStatus::Failed };
            *job.result.write().await = Some(result);
        });

        job_id
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Option<JobStatus> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&job_id)?;
        Some(*job.status.read().await)
    }

    /// Polls at a fixed interval until the job leaves `Running` or `timeout`
    /// elapses.
    pub async fn wait_for_job(&self, job_id: Uuid, timeout: StdDuration) -> Option<SubResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let jobs = self.jobs.read().await;
            let job = jobs.get(&job_id)?.clone();
            drop(jobs);

            if *job.status.read().await != JobStatus::Running {
                return job.result.read().await.clone();
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(StdDuration::from_millis(self.config.job_poll_interval_ms)).await;
        }
    }

    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::RunnerConfig as RC;
    use async_trait::async_trait;

    struct EchoRunner;

    #[async_trait]
    impl Runner for EchoRunner {
        async fn run(&self) -> SubResult {
            SubResult::ok("echo", "done")
        }
        async fn stop(&self) {}
    }

    struct EchoFactory;

    #[async_trait]
    impl RunnerFactory for EchoFactory {
        async fn create(&self, _config: RC) -> crate::domain::errors::DomainResult<Box<dyn Runner>> {
            Ok(Box::new(EchoRunner))
        }
    }

    fn spawn_config(depth: u8) -> SpawnConfig {
        SpawnConfig {
            task: "do it".into(),
            tools: vec!["shell".into()],
            max_turns: None,
            cwd: "/tmp".into(),
            session_id: "s".into(),
            parent_session_id: None,
            depth,
            role: Role::Worker,
            timeout_ms: None,
            parent_allowed_tools: None,
        }
    }

    #[tokio::test]
    async fn depth_at_max_is_refused_without_creating_a_runner() {
        let manager = SubagentManager::new(
            SubagentManagerConfig { max_depth: 1, ..Default::default() },
            Arc::new(EchoFactory),
        );
        let result = manager.spawn(spawn_config(1)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("max depth"));
    }

    #[tokio::test]
    async fn successful_spawn_returns_runner_result() {
        let manager = SubagentManager::new(SubagentManagerConfig::default(), Arc::new(EchoFactory));
        let result = manager.spawn(spawn_config(0)).await;
        assert!(result.success);
        assert_eq!(result.result.as_deref(), Some("done"));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn tool_filtering_drops_spawn_capable_near_max_depth() {
        let tools = effective_tools(
            &["shell".to_string(), "spawn_subagent".to_string()],
            &[],
            &["spawn_subagent".to_string()],
            2,
            3,
            None,
        );
        assert_eq!(tools, vec!["shell".to_string()]);
    }

    #[test]
    fn tool_filtering_never_exceeds_parent_allowed_set() {
        let tools = effective_tools(
            &["shell".to_string(), "web".to_string()],
            &[],
            &[],
            0,
            5,
            Some(&["shell".to_string()]),
        );
        assert_eq!(tools, vec!["shell".to_string()]);
    }
}
