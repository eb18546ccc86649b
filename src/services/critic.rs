//! Critic: static checks plus an optional LLM review pass over an
//! aggregated result, composing a set of pluggable overseer checks.

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Role, TaskId};
use crate::domain::ports::{RunnerConfig, RunnerFactory};
use crate::services::extract_json_from_response;
use crate::services::overseers::{default_overseers, run_all, CriticContext, CriticSection, Overseer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticIssue {
    pub category: String,
    pub severity: IssueSeverity,
    pub message: String,
    pub task_ids: Vec<TaskId>,
}

impl CriticIssue {
    pub fn new(
        category: impl Into<String>,
        severity: IssueSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            severity,
            message: message.into(),
            task_ids: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.task_ids = ids.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUpKind {
    Task,
    Manual,
}

#[derive(Debug, Clone)]
pub struct FollowUp {
    pub kind: FollowUpKind,
    pub description: String,
    pub required: bool,
    pub task_ids: Vec<TaskId>,
}

/// Parsed (or heuristically-recovered) output of the LLM review path.
#[derive(Debug, Clone, Deserialize)]
struct LlmReviewOutput {
    approved: bool,
    #[serde(default)]
    quality_score: f64,
    #[serde(default)]
    issues: Vec<LlmIssue>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmIssue {
    category: String,
    severity: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct CriticReview {
    pub approved: bool,
    pub quality_score: f64,
    pub issues: Vec<CriticIssue>,
    pub follow_ups: Vec<FollowUp>,
    pub summary: String,
    pub feedback: String,
}

#[derive(Debug, Clone)]
pub struct CriticConfig {
    pub blocking_severity: IssueSeverity,
    pub blocking_categories: Vec<String>,
    pub enable_llm_review: bool,
    pub max_turns: u32,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            blocking_severity: IssueSeverity::High,
            blocking_categories: vec![
                "unsafe_action".to_string(),
                "security".to_string(),
                "correctness".to_string(),
            ],
            enable_llm_review: false,
            max_turns: 10,
        }
    }
}

pub struct Critic {
    config: CriticConfig,
    overseers: Vec<Box<dyn Overseer>>,
    runner_factory: Option<std::sync::Arc<dyn RunnerFactory>>,
}

impl Critic {
    pub fn new(config: CriticConfig) -> Self {
        Self {
            config,
            overseers: default_overseers(),
            runner_factory: None,
        }
    }

    pub fn with_runner_factory(mut self, factory: std::sync::Arc<dyn RunnerFactory>) -> Self {
        self.runner_factory = Some(factory);
        self
    }

    /// Static checks path: always runs, deterministic, authoritative for
    /// blocking.
    pub fn run_static_checks(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        run_all(&self.overseers, ctx)
    }

    fn is_blocked(&self, issues: &[CriticIssue]) -> bool {
        issues.iter().any(|issue| {
            issue.severity >= self.config.blocking_severity
                || self.config.blocking_categories.contains(&issue.category)
        })
    }

    fn build_follow_ups(&self, issues: &[CriticIssue]) -> Vec<FollowUp> {
        issues
            .iter()
            .filter(|i| i.severity != IssueSeverity::Info)
            .map(|i| {
                let kind = if i.category == "missing_step" {
                    FollowUpKind::Task
                } else {
                    FollowUpKind::Manual
                };
                FollowUp {
                    kind,
                    description: i.message.clone(),
                    required: i.severity >= IssueSeverity::High,
                    task_ids: i.task_ids.clone(),
                }
            })
            .collect()
    }

    /// Runs static checks, then — if enabled and a runner factory was
    /// supplied — the LLM review, and combines both into one [`CriticReview`].
    pub async fn review(
        &self,
        goal: &str,
        task_summary: &str,
        ctx: &CriticContext<'_>,
        session_id: &str,
        depth: u8,
    ) -> DomainResult<CriticReview> {
        let mut issues = self.run_static_checks(ctx);
        let mut quality_score = ctx.confidence;
        let mut summary = String::new();
        let mut feedback = String::new();

        if self.config.enable_llm_review {
            if let Some(factory) = &self.runner_factory {
                let prompt = format!(
                    "Goal: {goal}\nTasks: {task_summary}\nAggregated content:\n{}\n\n\
                     Respond with a JSON object: {{\"approved\": bool, \"qualityScore\": number, \
                     \"issues\": [{{\"category\": string, \"severity\": string, \"message\": string}}], \
                     \"summary\": string, \"feedback\": string}}.",
                    ctx.content
                );
                let runner_config = RunnerConfig {
                    task: prompt,
                    tools: Vec::new(),
                    max_turns: self.config.max_turns,
                    cwd: String::new(),
                    session_id: session_id.to_string(),
                    depth,
                    role: Role::Critic,
                };
                let runner = factory.create(runner_config).await?;
                let result = runner.run().await;
                if let Some(text) = result.result.as_deref() {
                    match parse_llm_review(text) {
                        Some(parsed) => {
                            quality_score = parsed.quality_score;
                            summary = parsed.summary;
                            feedback = parsed.feedback;
                            issues.extend(parsed.issues.into_iter().map(|i| {
                                CriticIssue::new(i.category, parse_severity(&i.severity), i.message)
                            }));
                        }
                        None => {
                            // Text heuristic fallback.
                            let lower = text.to_lowercase();
                            let heuristic_approved =
                                lower.contains("approved") && !lower.contains("not approved");
                            if !heuristic_approved {
                                issues.push(CriticIssue::new(
                                    "review",
                                    IssueSeverity::Medium,
                                    "LLM review output could not be parsed as structured JSON",
                                ));
                            }
                        }
                    }
                }
            }
        }

        let follow_ups = self.build_follow_ups(&issues);
        let blocked = self.is_blocked(&issues);
        let approved = !blocked && issues.is_empty();

        Ok(CriticReview {
            approved,
            quality_score,
            issues,
            follow_ups,
            summary,
            feedback,
        })
    }
}

fn parse_severity(raw: &str) -> IssueSeverity {
    match raw.to_lowercase().as_str() {
        "critical" => IssueSeverity::Critical,
        "high" => IssueSeverity::High,
        "medium" => IssueSeverity::Medium,
        "low" => IssueSeverity::Low,
        _ => IssueSeverity::Info,
    }
}

fn parse_llm_review(text: &str) -> Option<LlmReviewOutput> {
    let json = extract_json_from_response(text);
    serde_json::from_str(json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_ctx() -> CriticContext<'static> {
        CriticContext {
            confidence: 0.9,
            total_tasks: 2,
            failed_tasks: 0,
            conflict_count: 0,
            content: "a perfectly sufficient piece of synthesized content for review purposes.",
            sections: &[],
            all_task_ids: &[],
        }
    }

    #[tokio::test]
    async fn clean_result_is_approved_with_no_llm_review() {
        let critic = Critic::new(CriticConfig::default());
        let ctx = empty_ctx();
        let review = critic.review("goal", "tasks", &ctx, "s", 1).await.unwrap();
        assert!(review.approved);
        assert!(review.issues.is_empty());
    }

    #[test]
    fn high_severity_issue_blocks_review() {
        let critic = Critic::new(CriticConfig::default());
        let issues = vec![CriticIssue::new("correctness", IssueSeverity::High, "bad")];
        assert!(critic.is_blocked(&issues));
    }

    #[test]
    fn blocking_category_blocks_even_at_medium_severity() {
        let critic = Critic::new(CriticConfig::default());
        let issues = vec![CriticIssue::new("security", IssueSeverity::Medium, "leak")];
        assert!(critic.is_blocked(&issues));
    }

    #[test]
    fn missing_step_issue_becomes_task_follow_up() {
        let critic = Critic::new(CriticConfig::default());
        let issues = vec![CriticIssue::new("missing_step", IssueSeverity::High, "gap").with_tasks([TaskId::new()])];
        let follow_ups = critic.build_follow_ups(&issues);
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].kind, FollowUpKind::Task);
        assert!(follow_ups[0].required);
    }
}
