//! Critic static-checks path, concretized as independent `Overseer` checks
//! that each inspect one slice of an aggregated result and contribute
//! issues of their own.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::models::TaskId;
use crate::services::critic::{CriticIssue, IssueSeverity};

/// One content section contributed by a task, as handed to the critic by
/// the aggregator (mirrors [`crate::services::aggregator::Section`] minus
/// its resolution bookkeeping).
#[derive(Debug, Clone)]
pub struct CriticSection {
    pub heading: String,
    pub content: String,
    pub source_task_ids: Vec<TaskId>,
}

/// Everything an [`Overseer`] needs to evaluate one aggregated result.
pub struct CriticContext<'a> {
    pub confidence: f64,
    pub total_tasks: usize,
    pub failed_tasks: usize,
    pub conflict_count: usize,
    pub content: &'a str,
    pub sections: &'a [CriticSection],
    pub all_task_ids: &'a [TaskId],
}

impl CriticContext<'_> {
    fn failure_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.failed_tasks as f64 / self.total_tasks as f64
        }
    }
}

pub trait Overseer: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue>;
}

pub struct ConfidenceOverseer {
    pub threshold: f64,
}

impl Default for ConfidenceOverseer {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Overseer for ConfidenceOverseer {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        if ctx.confidence < self.threshold {
            vec![CriticIssue::new(
                "confidence",
                IssueSeverity::Medium,
                format!(
                    "aggregated confidence {:.2} is below the {:.2} threshold",
                    ctx.confidence, self.threshold
                ),
            )]
        } else {
            Vec::new()
        }
    }
}

pub struct FailureRateOverseer {
    pub threshold: f64,
}

impl Default for FailureRateOverseer {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

impl Overseer for FailureRateOverseer {
    fn name(&self) -> &'static str {
        "failure_rate"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        let rate = ctx.failure_rate();
        if rate > self.threshold {
            vec![CriticIssue::new(
                "failure_rate",
                IssueSeverity::High,
                format!(
                    "{}/{} tasks failed ({:.0}% > {:.0}% threshold)",
                    ctx.failed_tasks,
                    ctx.total_tasks,
                    rate * 100.0,
                    self.threshold * 100.0
                ),
            )]
        } else {
            Vec::new()
        }
    }
}

#[derive(Default)]
pub struct ConflictOverseer;

impl Overseer for ConflictOverseer {
    fn name(&self) -> &'static str {
        "conflict"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        if ctx.conflict_count > 0 {
            vec![CriticIssue::new(
                "correctness",
                IssueSeverity::Medium,
                format!("{} unresolved section conflict(s) in aggregated output", ctx.conflict_count),
            )]
        } else {
            Vec::new()
        }
    }
}

pub struct ContentLengthOverseer {
    pub minimum_chars: usize,
}

impl Default for ContentLengthOverseer {
    fn default() -> Self {
        Self { minimum_chars: 50 }
    }
}

impl Overseer for ContentLengthOverseer {
    fn name(&self) -> &'static str {
        "content_length"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        if ctx.content.trim().len() < self.minimum_chars {
            vec![CriticIssue::new(
                "completeness",
                IssueSeverity::High,
                format!(
                    "aggregated content is only {} chars (< {} minimum)",
                    ctx.content.trim().len(),
                    self.minimum_chars
                ),
            )]
        } else {
            Vec::new()
        }
    }
}

fn credential_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"sk-ant-[a-zA-Z0-9_-]{20,}").unwrap(),
            Regex::new(r"(?i)api[_-]?key\s*[:=]\s*\S+").unwrap(),
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9._-]{10,}").unwrap(),
            Regex::new(r"(?i)(password|passwd)\s*[:=]\s*\S+").unwrap(),
            Regex::new(r"(?i)\brm\s+-rf\s+/").unwrap(),
            Regex::new(r"(?i)\bdrop\s+table\b").unwrap(),
        ]
    })
}

/// Flags credential-shaped and unsafe-operation-shaped substrings against
/// its own fixed pattern set (api keys, bearer tokens, password fields,
/// `rm -rf /`, `drop table`).
#[derive(Default)]
pub struct CredentialPatternOverseer;

impl Overseer for CredentialPatternOverseer {
    fn name(&self) -> &'static str {
        "credential_pattern"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        credential_patterns()
            .iter()
            .filter(|re| re.is_match(ctx.content))
            .map(|re| {
                CriticIssue::new(
                    "security",
                    IssueSeverity::Critical,
                    format!("content matches a credential/unsafe-operation pattern ({})", re.as_str()),
                )
            })
            .collect()
    }
}

#[derive(Default)]
pub struct CoverageGapOverseer;

impl Overseer for CoverageGapOverseer {
    fn name(&self) -> &'static str {
        "coverage_gap"
    }

    fn check(&self, ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
        let covered: std::collections::HashSet<TaskId> = ctx
            .sections
            .iter()
            .flat_map(|s| s.source_task_ids.iter().copied())
            .collect();
        let missing: Vec<TaskId> = ctx
            .all_task_ids
            .iter()
            .copied()
            .filter(|id| !covered.contains(id))
            .collect();
        if missing.is_empty() {
            Vec::new()
        } else {
            vec![CriticIssue::new(
                "missing_step",
                IssueSeverity::Medium,
                format!("{} task(s) are not represented in any aggregated section", missing.len()),
            )
            .with_tasks(missing)]
        }
    }
}

/// Runs every registered overseer and concatenates their issues — fixed,
/// deterministic order.
pub fn default_overseers() -> Vec<Box<dyn Overseer>> {
    vec![
        Box::new(ConfidenceOverseer::default()),
        Box::new(FailureRateOverseer::default()),
        Box::new(ConflictOverseer),
        Box::new(ContentLengthOverseer::default()),
        Box::new(CredentialPatternOverseer),
        Box::new(CoverageGapOverseer),
    ]
}

pub fn run_all(overseers: &[Box<dyn Overseer>], ctx: &CriticContext<'_>) -> Vec<CriticIssue> {
    overseers.iter().flat_map(|o| o.check(ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(content: &str) -> CriticContext<'_> {
        CriticContext {
            confidence: 0.9,
            total_tasks: 4,
            failed_tasks: 0,
            conflict_count: 0,
            content,
            sections: &[],
            all_task_ids: &[],
        }
    }

    #[test]
    fn content_length_flags_short_output() {
        let overseer = ContentLengthOverseer::default();
        let issues = overseer.check(&ctx("too short"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::High);
    }

    #[test]
    fn credential_pattern_flags_api_key() {
        let overseer = CredentialPatternOverseer;
        let issues = overseer.check(&ctx("leaked sk-ant-REDACTED"));
        assert!(!issues.is_empty());
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
    }

    #[test]
    fn coverage_gap_detects_unrepresented_task() {
        let missing = TaskId::new();
        let present = TaskId::new();
        let ctx = CriticContext {
            confidence: 0.9,
            total_tasks: 2,
            failed_tasks: 0,
            conflict_count: 0,
            content: "a fully sufficient piece of content describing the work done here.",
            sections: &[CriticSection {
                heading: "result".into(),
                content: "x".into(),
                source_task_ids: vec![present],
            }],
            all_task_ids: &[present, missing],
        };
        let issues = CoverageGapOverseer.check(&ctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].task_ids, vec![missing]);
    }

    #[test]
    fn default_overseers_run_in_fixed_order() {
        let overseers = default_overseers();
        let names: Vec<&str> = overseers.iter().map(|o| o.name()).collect();
        assert_eq!(
            names,
            vec![
                "confidence",
                "failure_rate",
                "conflict",
                "content_length",
                "credential_pattern",
                "coverage_gap",
            ]
        );
    }
}
