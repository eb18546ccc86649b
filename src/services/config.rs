//! Configuration surface: every recognized option across the swarm,
//! subagent manager, dispatcher, and decision policy, loaded hierarchically
//! via figment with the same layered-merge precedence as other
//! figment-based loaders in this codebase.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::circuit_breaker::CircuitBreakerConfig;
use crate::services::coordinator::CoordinatorConfig;
use crate::services::decision_policy::DecisionPolicyConfig;
use crate::services::dispatcher::DispatcherConfig;
use crate::services::graph_builder::GraphBuilderConfig;
use crate::services::subagent_manager::SubagentManagerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid maxConcurrent: {0}, must be at least 1")]
    InvalidMaxConcurrent(u32),

    #[error("invalid maxDepth: {0}, must be at least 1")]
    InvalidMaxDepth(u8),

    #[error("invalid maxTasks: {0}, must be at least 1")]
    InvalidMaxTasks(usize),

    #[error("invalid taskTimeoutMs: {0}, must be positive")]
    InvalidTaskTimeoutMs(u64),

    #[error("invalid maxRetries/backoffMultiplier combination: backoffMultiplier must be >= 1.0")]
    InvalidBackoffMultiplier,

    #[error("invalid swarmScoreThreshold: {0}, must be within [0.0, 1.0]")]
    InvalidThreshold(f64),

    #[error("figment extraction failed: {0}")]
    Extraction(String),
}

/// Serializable mirror of [`CoordinatorConfig`] minus the non-serializable
/// `DispatcherConfig` nesting, so the whole surface loads from one YAML
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSurfaceConfig {
    pub enabled: bool,
    pub max_concurrent: u32,
    pub max_tasks: usize,
    pub max_depth: u8,
    pub task_timeout_ms: u64,
    pub swarm_timeout_ms: u64,
    pub auto_approve: bool,
    pub enable_critic: bool,
    pub max_critic_iterations: u32,
    pub planner_tools: Vec<String>,
    pub worker_tools: Vec<String>,
    pub critic_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
    pub token_budget: u64,
    /// No shared-memory mechanism exists in this crate (open question,
    /// recorded in DESIGN.md); kept as a documented no-op so a caller's
    /// existing config file round-trips without an unknown-field error.
    pub enable_shared_memory: bool,
}

impl Default for SwarmSurfaceConfig {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            enabled: defaults.enabled,
            max_concurrent: defaults.dispatcher.max_concurrent,
            max_tasks: defaults.max_tasks,
            max_depth: defaults.max_depth,
            task_timeout_ms: defaults.task_timeout_ms,
            swarm_timeout_ms: defaults.swarm_timeout_ms,
            auto_approve: defaults.auto_approve,
            enable_critic: defaults.enable_critic,
            max_critic_iterations: defaults.max_critic_iterations,
            planner_tools: defaults.planner_tools,
            worker_tools: defaults.worker_tools,
            critic_tools: defaults.critic_tools,
            forbidden_tools: defaults.forbidden_tools,
            token_budget: defaults.token_budget,
            enable_shared_memory: defaults.enable_shared_memory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentManagerSurfaceConfig {
    pub max_depth: u8,
    pub max_concurrent: u32,
    pub max_turns: u32,
    pub default_timeout_ms: u64,
    pub default_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
}

impl Default for SubagentManagerSurfaceConfig {
    fn default() -> Self {
        let defaults = SubagentManagerConfig::default();
        Self {
            max_depth: defaults.max_depth,
            max_concurrent: defaults.max_concurrent,
            max_turns: defaults.max_turns,
            default_timeout_ms: defaults.default_timeout_ms,
            default_tools: defaults.default_tools,
            forbidden_tools: defaults.forbidden_tools,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherSurfaceConfig {
    pub max_concurrent: u32,
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub dep_timeout_ms: i64,
    pub max_queue_size: usize,
    pub forbidden_tools: Vec<String>,
    pub default_worker_tools: Vec<String>,
    pub max_turns_per_task: u32,
}

impl Default for DispatcherSurfaceConfig {
    fn default() -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            max_concurrent: defaults.max_concurrent,
            default_timeout_ms: defaults.default_timeout_ms,
            max_retries: defaults.max_retries,
            retry_delay_ms: defaults.retry_delay_ms,
            backoff_multiplier: defaults.backoff_multiplier,
            max_backoff_ms: defaults.max_backoff_ms,
            dep_timeout_ms: defaults.dep_timeout_ms,
            max_queue_size: defaults.max_queue_size,
            forbidden_tools: Vec::new(),
            default_worker_tools: Vec::new(),
            max_turns_per_task: defaults.max_turns_per_task,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPolicySurfaceConfig {
    pub complexity_threshold: f64,
    pub min_subtasks_for_parallel: u32,
    pub auto_swarm: bool,
    pub ask_for_high_risk: bool,
    pub high_risk_threshold: f64,
    pub swarm_score_threshold: f64,
}

impl From<&DecisionPolicyConfig> for DecisionPolicySurfaceConfig {
    fn from(c: &DecisionPolicyConfig) -> Self {
        Self {
            complexity_threshold: c.complexity_threshold,
            min_subtasks_for_parallel: c.min_subtasks_for_parallel,
            auto_swarm: c.auto_swarm,
            ask_for_high_risk: c.ask_for_high_risk,
            high_risk_threshold: c.high_risk_threshold,
            swarm_score_threshold: c.swarm_score_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphBuilderSurfaceConfig {
    pub max_tasks: usize,
    pub insert_critic_per_checkpoint: bool,
    pub insert_aggregation_task: bool,
}

impl Default for GraphBuilderSurfaceConfig {
    fn default() -> Self {
        let defaults = GraphBuilderConfig::default();
        Self {
            max_tasks: defaults.max_tasks,
            insert_critic_per_checkpoint: defaults.insert_critic_per_checkpoint,
            insert_aggregation_task: defaults.insert_aggregation_task,
        }
    }
}

/// The root configuration document: one YAML file (plus env overrides)
/// covers every recognized option.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SwarmRuntimeConfig {
    #[serde(default)]
    pub swarm: SwarmSurfaceConfig,
    #[serde(default)]
    pub subagent_manager: SubagentManagerSurfaceConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSurfaceConfig,
    #[serde(default)]
    pub decision_policy: DecisionPolicySurfaceConfig,
    #[serde(default)]
    pub graph_builder: GraphBuilderSurfaceConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl SwarmRuntimeConfig {
    /// Hierarchical merge, lowest to highest precedence:
    /// programmatic defaults, project config file, local overrides,
    /// `SWARM_`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(".swarm/config.yaml"))
            .merge(Yaml::file(".swarm/local.yaml"))
            .merge(Env::prefixed("SWARM_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Extraction(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| ConfigError::Extraction(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Initializes the global tracing subscriber from the loaded `logging`
    /// section. Callers that embed this crate call this once at startup,
    /// after [`Self::load`], before driving any swarm.
    pub fn init_logging(&self) -> anyhow::Result<LoggerImpl> {
        LoggerImpl::init(&self.logging)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swarm.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent(self.swarm.max_concurrent));
        }
        if self.dispatcher.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent(self.dispatcher.max_concurrent));
        }
        if self.swarm.max_depth == 0 {
            return Err(ConfigError::InvalidMaxDepth(self.swarm.max_depth));
        }
        if self.swarm.max_tasks == 0 {
            return Err(ConfigError::InvalidMaxTasks(self.swarm.max_tasks));
        }
        if self.swarm.task_timeout_ms == 0 {
            return Err(ConfigError::InvalidTaskTimeoutMs(self.swarm.task_timeout_ms));
        }
        if self.dispatcher.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier);
        }
        if !(0.0..=1.0).contains(&self.decision_policy.swarm_score_threshold) {
            return Err(ConfigError::InvalidThreshold(self.decision_policy.swarm_score_threshold));
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            enabled: self.swarm.enabled,
            max_tasks: self.swarm.max_tasks,
            max_depth: self.swarm.max_depth,
            task_timeout_ms: self.swarm.task_timeout_ms,
            swarm_timeout_ms: self.swarm.swarm_timeout_ms,
            auto_approve: self.swarm.auto_approve,
            enable_critic: self.swarm.enable_critic,
            max_critic_iterations: self.swarm.max_critic_iterations,
            planner_tools: self.swarm.planner_tools.clone(),
            worker_tools: self.swarm.worker_tools.clone(),
            critic_tools: self.swarm.critic_tools.clone(),
            forbidden_tools: self.swarm.forbidden_tools.clone(),
            token_budget: self.swarm.token_budget,
            enable_shared_memory: self.swarm.enable_shared_memory,
            dispatcher: self.dispatcher_config(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent: self.dispatcher.max_concurrent,
            default_timeout_ms: self.dispatcher.default_timeout_ms,
            max_retries: self.dispatcher.max_retries,
            retry_delay_ms: self.dispatcher.retry_delay_ms,
            backoff_multiplier: self.dispatcher.backoff_multiplier,
            max_backoff_ms: self.dispatcher.max_backoff_ms,
            dep_timeout_ms: self.dispatcher.dep_timeout_ms,
            max_queue_size: self.dispatcher.max_queue_size,
            max_turns_per_task: self.dispatcher.max_turns_per_task,
        }
    }

    pub fn subagent_manager_config(&self) -> SubagentManagerConfig {
        SubagentManagerConfig {
            max_depth: self.subagent_manager.max_depth,
            max_concurrent: self.subagent_manager.max_concurrent,
            max_turns: self.subagent_manager.max_turns,
            default_timeout_ms: self.subagent_manager.default_timeout_ms,
            default_tools: self.subagent_manager.default_tools.clone(),
            forbidden_tools: self.subagent_manager.forbidden_tools.clone(),
            ..SubagentManagerConfig::default()
        }
    }

    pub fn decision_policy_config(&self) -> DecisionPolicyConfig {
        DecisionPolicyConfig {
            complexity_threshold: self.decision_policy.complexity_threshold,
            min_subtasks_for_parallel: self.decision_policy.min_subtasks_for_parallel,
            auto_swarm: self.decision_policy.auto_swarm,
            ask_for_high_risk: self.decision_policy.ask_for_high_risk,
            high_risk_threshold: self.decision_policy.high_risk_threshold,
            swarm_score_threshold: self.decision_policy.swarm_score_threshold,
            ..DecisionPolicyConfig::default()
        }
    }

    pub fn graph_builder_config(&self) -> GraphBuilderConfig {
        GraphBuilderConfig {
            max_tasks: self.graph_builder.max_tasks,
            insert_critic_per_checkpoint: self.graph_builder.insert_critic_per_checkpoint,
            insert_aggregation_task: self.graph_builder.insert_aggregation_task,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SwarmRuntimeConfig::default();
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn zero_max_concurrent_is_rejected() {
        let mut config = SwarmRuntimeConfig::default();
        config.dispatcher.max_concurrent = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxConcurrent(0)));
    }

    #[test]
    fn sub_unity_backoff_multiplier_is_rejected() {
        let mut config = SwarmRuntimeConfig::default();
        config.dispatcher.backoff_multiplier = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackoffMultiplier));
    }

    #[test]
    fn yaml_round_trip_overrides_nested_fields() {
        let yaml = r"
swarm:
  enabled: true
  maxConcurrent: 8
  maxTasks: 20
  maxDepth: 3
  taskTimeoutMs: 60000
  swarmTimeoutMs: 300000
  autoApprove: true
  enableCritic: false
  maxCriticIterations: 1
  plannerTools: []
  workerTools: []
  criticTools: []
  forbiddenTools: []
  tokenBudget: 0
  enableSharedMemory: false
dispatcher:
  maxConcurrent: 8
  defaultTimeoutMs: 60000
  maxRetries: 5
  retryDelayMs: 500
  backoffMultiplier: 1.5
  maxBackoffMs: 10000
  depTimeoutMs: 60000
  maxQueueSize: 100
  forbiddenTools: []
  defaultWorkerTools: []
  maxTurnsPerTask: 10
";
        let config: SwarmRuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.swarm.max_concurrent, 8);
        assert_eq!(config.dispatcher.max_retries, 5);
        config.validate().unwrap();
    }

    #[test]
    fn default_logging_section_uses_log_config_defaults() {
        let config = SwarmRuntimeConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn yaml_override_reaches_logging_section() {
        let yaml = r#"
logging:
  level: debug
  enableStdout: false
"#;
        let config: SwarmRuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.enable_stdout);
    }
}
