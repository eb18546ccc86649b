//! Enforcer: wraps [`DecisionPolicy`] with depth/budget/capability/
//! guardrail/tool-availability gates.

use std::sync::Arc;

use crate::domain::ports::{BudgetGate, CapabilityGate, GuardrailGate, ToolRegistry};
use crate::services::decision_policy::{Analysis, Decision, DecisionKind, DecisionPolicy};

#[derive(Debug, Clone)]
pub struct SwarmConfigSuggestion {
    pub max_concurrent: u32,
    pub enable_critic: bool,
    pub auto_approve: bool,
}

#[derive(Debug, Clone)]
pub struct EnforcerDecision {
    pub decision: DecisionKind,
    pub reasons: Vec<String>,
    pub confidence: f64,
    pub blocked_reasons: Vec<String>,
    pub suggested_config: Option<SwarmConfigSuggestion>,
}

pub struct Enforcer {
    policy: DecisionPolicy,
    max_swarm_depth: u8,
    capability_gate: Option<Arc<dyn CapabilityGate>>,
    budget_gate: Option<Arc<dyn BudgetGate>>,
    guardrail_gate: Option<Arc<dyn GuardrailGate>>,
    tool_registry: Option<Arc<dyn ToolRegistry>>,
    spawn_tools: Vec<String>,
}

impl Enforcer {
    pub fn new(policy: DecisionPolicy, max_swarm_depth: u8) -> Self {
        Self {
            policy,
            max_swarm_depth,
            capability_gate: None,
            budget_gate: None,
            guardrail_gate: None,
            tool_registry: None,
            spawn_tools: Vec::new(),
        }
    }

    pub fn with_capability_gate(mut self, gate: Arc<dyn CapabilityGate>) -> Self {
        self.capability_gate = Some(gate);
        self
    }

    pub fn with_budget_gate(mut self, gate: Arc<dyn BudgetGate>) -> Self {
        self.budget_gate = Some(gate);
        self
    }

    pub fn with_guardrail_gate(mut self, gate: Arc<dyn GuardrailGate>) -> Self {
        self.guardrail_gate = Some(gate);
        self
    }

    pub fn with_tool_registry(mut self, registry: Arc<dyn ToolRegistry>, spawn_tools: Vec<String>) -> Self {
        self.tool_registry = Some(registry);
        self.spawn_tools = spawn_tools;
        self
    }

    /// `decide` composed with the gate chain. Any gate failure forces
    /// `single_agent` and records the reason in `blocked_reasons`; the raw
    /// decision's reasons/confidence are preserved unmodified alongside.
    pub async fn analyze_and_decide(&self, goal: &str, current_depth: u8, session_id: &str) -> EnforcerDecision {
        let analysis: Analysis = self.policy.analyze(goal);
        let Decision { decision, reasons, confidence } = self.policy.decide(&analysis);

        let mut blocked_reasons = Vec::new();

        if current_depth >= self.max_swarm_depth {
            blocked_reasons.push(format!(
                "current depth {current_depth} meets or exceeds maxSwarmDepth {}",
                self.max_swarm_depth
            ));
        }
        if let Some(gate) = &self.budget_gate {
            if gate.is_exceeded().await {
                blocked_reasons.push("budget tracker reports overall budget exceeded".to_string());
            }
        }
        if let Some(gate) = &self.capability_gate {
            if !gate.can_spawn_subagent(session_id).await {
                blocked_reasons.push("capability enforcer denies subagent spawn at this session".to_string());
            }
        }
        if let Some(gate) = &self.guardrail_gate {
            if gate.denies_spawn_tool().await {
                blocked_reasons.push("guardrail policy denies the spawn tool".to_string());
            }
        }
        if let Some(registry) = &self.tool_registry {
            let available = registry.list_tools().await;
            let missing: Vec<&String> = self.spawn_tools.iter().filter(|t| !available.contains(t)).collect();
            if !missing.is_empty() {
                blocked_reasons.push(format!(
                    "spawn tools missing from the runtime tool registry: {missing:?}"
                ));
            }
        }

        let forced_decision = if blocked_reasons.is_empty() { decision } else { DecisionKind::SingleAgent };

        let suggested_config = if blocked_reasons.is_empty() && forced_decision == DecisionKind::Swarm {
            Some(SwarmConfigSuggestion {
                max_concurrent: analysis.estimated_subtasks.max(1),
                enable_critic: analysis.risk_score > 0.5 || analysis.complexity_score > 0.7,
                auto_approve: analysis.risk_score < 0.3 && analysis.complexity_score < 0.3,
            })
        } else {
            None
        };

        EnforcerDecision {
            decision: forced_decision,
            reasons,
            confidence,
            blocked_reasons,
            suggested_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::decision_policy::DecisionPolicyConfig;
    use async_trait::async_trait;

    struct AlwaysExceeded;

    #[async_trait]
    impl BudgetGate for AlwaysExceeded {
        async fn is_exceeded(&self) -> bool {
            true
        }
        async fn record_tokens(&self, _tokens: u64) {}
    }

    #[tokio::test]
    async fn depth_gate_forces_single_agent() {
        let enforcer = Enforcer::new(DecisionPolicy::new(DecisionPolicyConfig::default()), 2);
        let result = enforcer.analyze_and_decide("a complex multi-domain goal", 2, "s").await;
        assert_eq!(result.decision, DecisionKind::SingleAgent);
        assert!(!result.blocked_reasons.is_empty());
    }

    #[tokio::test]
    async fn exceeded_budget_gate_forces_single_agent() {
        let enforcer = Enforcer::new(DecisionPolicy::new(DecisionPolicyConfig::default()), 5)
            .with_budget_gate(Arc::new(AlwaysExceeded));
        let result = enforcer
            .analyze_and_decide(
                "refactor the api server and frontend react ui across 5 files in parallel",
                0,
                "s",
            )
            .await;
        assert_eq!(result.decision, DecisionKind::SingleAgent);
        assert!(result.suggested_config.is_none());
    }
}
