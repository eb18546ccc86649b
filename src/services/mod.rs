//! Application services: task graph, dispatcher, decision policy, graph
//! builder, subagent manager, aggregator, critic, postback, and the
//! coordinator that ties them together, plus their small collaborators.

pub mod aggregator;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod critic;
pub mod decision_policy;
pub mod dispatcher;
pub mod enforcer;
pub mod event_bus;
pub mod graph_builder;
pub mod hook_registry;
pub mod overseers;
pub mod postback;
pub mod status_provider;
pub mod subagent_manager;
pub mod task_graph;

pub use aggregator::{AggregatedResult, Aggregator, AggregatorConfig, AggregatorInput, Section, Strategy};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{ConfigError, SwarmRuntimeConfig};
pub use coordinator::{Coordinator, CoordinatorConfig, SwarmInput, SwarmResult};
pub use critic::{Critic, CriticConfig, CriticIssue, CriticReview, FollowUp, FollowUpKind, IssueSeverity};
pub use decision_policy::{Analysis, Decision, DecisionPolicy, DecisionPolicyConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatchStats};
pub use enforcer::{Enforcer, EnforcerDecision};
pub use event_bus::EventBus;
pub use graph_builder::{GraphBuilder, GraphBuilderConfig, RawPlannerOutputParsed};
pub use hook_registry::HookRegistry;
pub use postback::{Artifact, Postback, PostbackConfig, PostbackFormat, PostbackMessage, TaskOutcome};
pub use status_provider::{Listener, ProgressStyle, StatusProvider};
pub use subagent_manager::{JobStatus, SpawnConfig, SubagentManager, SubagentManagerConfig};
pub use task_graph::TaskGraph;

/// Extract the first JSON object or array embedded in free-form model
/// output — handles fenced ```json blocks and JSON embedded in prose.
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return trimmed;
    }

    let obj = trimmed.find('{').zip(trimmed.rfind('}'));
    let arr = trimmed.find('[').zip(trimmed.rfind(']'));
    match (obj, arr) {
        (Some((os, oe)), Some((as_, ae))) => {
            if os <= as_ {
                &trimmed[os..=oe]
            } else {
                &trimmed[as_..=ae]
            }
        }
        (Some((os, oe)), None) => &trimmed[os..=oe],
        (None, Some((as_, ae))) => &trimmed[as_..=ae],
        (None, None) => trimmed,
    }
}
