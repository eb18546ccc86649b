//! Hook Registry: ordered hook chains fired around a subagent's lifecycle.
//! Adapted from a `HookResult::{Continue, Blocked}` veto shape to this
//! crate's `Hook`/`HookOutput` ports.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::ports::{Hook, HookEvent, HookInput, HookOutput};

/// Outcome of firing every hook registered for one event.
#[derive(Debug, Clone, Default)]
pub struct HookChainResult {
    pub veto: Option<String>,
    pub updated_allowed_tools: Option<Vec<String>>,
    pub updated_result: Option<crate::domain::models::SubResult>,
    pub additional_context: Vec<String>,
}

impl HookChainResult {
    pub fn is_vetoed(&self) -> bool {
        self.veto.is_some()
    }
}

/// Holds the ordered hook list per event. Registration order is fire order.
#[derive(Default)]
pub struct HookRegistry {
    start_hooks: RwLock<Vec<Arc<dyn Hook>>>,
    stop_hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, event: HookEvent, hook: Arc<dyn Hook>) {
        match event {
            HookEvent::SubagentStart => self.start_hooks.write().await.push(hook),
            HookEvent::SubagentStop => self.stop_hooks.write().await.push(hook),
        }
    }

    /// `SubagentStart`: first hook to veto wins; remaining hooks in the chain
    /// are skipped once a veto is seen.
    pub async fn fire_start(&self, input: &HookInput) -> HookChainResult {
        let hooks = self.start_hooks.read().await;
        let mut result = HookChainResult::default();
        for hook in hooks.iter() {
            let Some(output) = hook.fire(input).await else { continue };
            merge_non_veto(&mut result, &output);
            if output.is_veto() {
                result.veto = output.stop_reason.clone();
                break;
            }
        }
        result
    }

    /// `SubagentStop`: every hook runs (no early exit on veto — a stop-time
    /// veto blocks the *result* from being accepted, it does not abort
    /// already-completed work); mutations fold left-to-right so a later hook
    /// sees an earlier hook's `updated_result`.
    pub async fn fire_stop(&self, input: &HookInput) -> HookChainResult {
        let hooks = self.stop_hooks.read().await;
        let mut result = HookChainResult::default();
        let mut current_input = input.clone();
        for hook in hooks.iter() {
            let Some(output) = hook.fire(&current_input).await else { continue };
            if let Some(updated) = output.updated_result.clone() {
                current_input.result = Some(updated);
            }
            merge_non_veto(&mut result, &output);
            if output.is_veto() && result.veto.is_none() {
                result.veto = output.stop_reason.clone();
            }
        }
        result
    }
}

fn merge_non_veto(result: &mut HookChainResult, output: &HookOutput) {
    if let Some(tools) = &output.updated_allowed_tools {
        result.updated_allowed_tools = Some(tools.clone());
    }
    if let Some(updated) = &output.updated_result {
        result.updated_result = Some(updated.clone());
    }
    if let Some(ctx) = &output.additional_context {
        result.additional_context.push(ctx.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct VetoHook(&'static str);

    #[async_trait]
    impl Hook for VetoHook {
        fn name(&self) -> &str {
            "veto"
        }
        async fn fire(&self, _input: &HookInput) -> Option<HookOutput> {
            Some(HookOutput::vetoed(self.0))
        }
    }

    struct PassHook;

    #[async_trait]
    impl Hook for PassHook {
        fn name(&self) -> &str {
            "pass"
        }
        async fn fire(&self, _input: &HookInput) -> Option<HookOutput> {
            None
        }
    }

    fn input(event: HookEvent) -> HookInput {
        HookInput {
            event,
            session_id: "s".into(),
            cwd: "/tmp".into(),
            subagent_id: "a".into(),
            parent_session_id: None,
            task: "t".into(),
            allowed_tools: vec![],
            max_turns: 5,
            depth: 1,
            status: None,
            result: None,
            error: None,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn first_veto_wins_on_start() {
        let registry = HookRegistry::new();
        registry.register(HookEvent::SubagentStart, Arc::new(PassHook)).await;
        registry.register(HookEvent::SubagentStart, Arc::new(VetoHook("no budget"))).await;
        registry.register(HookEvent::SubagentStart, Arc::new(VetoHook("unreachable"))).await;

        let result = registry.fire_start(&input(HookEvent::SubagentStart)).await;
        assert_eq!(result.veto.as_deref(), Some("no budget"));
    }

    #[tokio::test]
    async fn no_hooks_registered_is_not_vetoed() {
        let registry = HookRegistry::new();
        let result = registry.fire_start(&input(HookEvent::SubagentStart)).await;
        assert!(!result.is_vetoed());
    }
}
