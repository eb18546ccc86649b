//! Postback: renders a completed swarm as a message for hand-off back
//! to the parent session.

use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::models::{SwarmState, TaskId};
use crate::domain::ports::InboxSink;
use crate::services::critic::{CriticIssue, FollowUp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostbackFormat {
    Markdown,
    Json,
    Plain,
    Structured,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub description: String,
    pub succeeded: bool,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PostbackMessage {
    pub format: PostbackFormat,
    pub content: String,
    pub artifacts: Vec<Artifact>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct PostbackConfig {
    pub max_content_length: usize,
    pub truncation_length: usize,
}

impl Default for PostbackConfig {
    fn default() -> Self {
        Self {
            max_content_length: 8000,
            truncation_length: 2000,
        }
    }
}

pub struct Postback {
    config: PostbackConfig,
}

fn extract_code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim_start().starts_with("```") {
            let mut body = String::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                body.push_str(inner);
                body.push('\n');
            }
            if !body.trim().is_empty() {
                blocks.push(body.trim_end().to_string());
            }
        }
    }
    blocks
}

fn extract_file_paths(text: &str) -> Vec<String> {
    let re = regex::Regex::new(r"(?:^|[\s`(])((?:/|\./|[A-Za-z]:\\)?[\w./\\-]+\.[A-Za-z0-9]{1,8})(?:[\s`)]|$)")
        .unwrap();
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|p| p.contains('/') || p.contains('\\'))
        .collect()
}

fn extract_urls(text: &str) -> Vec<String> {
    let re = regex::Regex::new(r"https?://[^\s)\]]+").unwrap();
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        let mut truncated = text.chars().take(max_len).collect::<String>();
        truncated.push('…');
        truncated
    }
}

impl Postback {
    pub fn new(config: PostbackConfig) -> Self {
        Self { config }
    }

    pub fn extract_artifacts(&self, content: &str) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for block in extract_code_blocks(content) {
            artifacts.push(Artifact {
                kind: "code".to_string(),
                content: truncate(&block, self.config.truncation_length),
            });
        }
        for path in extract_file_paths(content) {
            artifacts.push(Artifact { kind: "file_path".to_string(), content: path });
        }
        for url in extract_urls(content) {
            artifacts.push(Artifact { kind: "url".to_string(), content: url });
        }
        artifacts
    }

    pub fn build(
        &self,
        format: PostbackFormat,
        state: &SwarmState,
        outcomes: &[TaskOutcome],
        issues: &[CriticIssue],
        follow_ups: &[FollowUp],
    ) -> PostbackMessage {
        let final_content = state.final_result.clone().unwrap_or_default();
        let truncated_content = truncate(&final_content, self.config.max_content_length);
        let artifacts = self.extract_artifacts(&final_content);

        let payload = json!({
            "swarmId": state.id,
            "status": format!("{:?}", state.status),
            "summary": truncated_content,
            "metrics": {
                "totalTasks": state.metrics.total_tasks,
                "completed": state.metrics.completed,
                "failed": state.metrics.failed,
                "tokensUsed": state.metrics.tokens_used,
            },
            "outcomes": outcomes,
            "issues": issues.iter().map(|i| json!({
                "category": i.category,
                "severity": format!("{:?}", i.severity),
                "message": i.message,
            })).collect::<Vec<_>>(),
            "followUps": follow_ups.iter().map(|f| json!({
                "description": f.description,
                "required": f.required,
            })).collect::<Vec<_>>(),
        });

        let content = match format {
            PostbackFormat::Markdown => render_markdown(&truncated_content, outcomes, issues),
            PostbackFormat::Plain => truncated_content.clone(),
            PostbackFormat::Json | PostbackFormat::Structured => payload.to_string(),
        };

        PostbackMessage { format, content, artifacts, payload }
    }

    /// Wraps content with a typed envelope suitable for an external inbox
    /// subsystem (out of scope here — [`InboxSink`] is the consumed port).
    pub async fn create_inbox_message(
        &self,
        sink: &dyn InboxSink,
        state: &SwarmState,
        message: &PostbackMessage,
    ) -> crate::domain::errors::DomainResult<()> {
        let title = state
            .final_result
            .as_deref()
            .and_then(|r| r.lines().next())
            .filter(|line| !line.trim().is_empty())
            .map(|line| truncate(line.trim(), 120))
            .unwrap_or_else(|| format!("swarm {} {:?}", state.id, state.status));

        let duration_ms = state
            .ended_at
            .map(|ended| (ended - state.started_at).num_milliseconds().max(0));

        let envelope = json!({
            "type": "swarm_result",
            "title": title,
            "format": format!("{:?}", message.format),
            "content": message.content,
            "artifactCount": message.artifacts.len(),
            "metadata": {
                "totalTasks": state.metrics.total_tasks,
                "completed": state.metrics.completed,
                "failed": state.metrics.failed,
                "tokensUsed": state.metrics.tokens_used,
                "durationMs": duration_ms,
            },
        });
        sink.deliver(envelope).await
    }
}

fn render_markdown(content: &str, outcomes: &[TaskOutcome], issues: &[CriticIssue]) -> String {
    let mut out = String::new();
    out.push_str("## Swarm result\n\n");
    out.push_str(content);
    out.push_str("\n\n### Tasks\n");
    for outcome in outcomes {
        let mark = if outcome.succeeded { "x" } else { " " };
        out.push_str(&format!("- [{mark}] {}\n", outcome.description));
    }
    if !issues.is_empty() {
        out.push_str("\n### Issues\n");
        for issue in issues {
            out.push_str(&format!("- **{:?}** ({}): {}\n", issue.severity, issue.category, issue.message));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_blocks_file_paths_and_urls() {
        let postback = Postback::new(PostbackConfig::default());
        let text = "See ```rust\nfn main() {}\n``` and edit src/lib.rs, also visit https://example.com/docs.";
        let artifacts = postback.extract_artifacts(text);
        assert!(artifacts.iter().any(|a| a.kind == "code"));
        assert!(artifacts.iter().any(|a| a.kind == "file_path" && a.content == "src/lib.rs"));
        assert!(artifacts.iter().any(|a| a.kind == "url"));
    }

    #[test]
    fn truncates_content_past_max_length() {
        let postback = Postback::new(PostbackConfig { max_content_length: 10, truncation_length: 10 });
        let mut state = SwarmState::new();
        state.final_result = Some("a".repeat(100));
        let message = postback.build(PostbackFormat::Plain, &state, &[], &[], &[]);
        assert!(message.content.len() <= 11);
    }

    struct CapturingSink {
        captured: std::sync::Mutex<Option<Value>>,
    }

    #[async_trait::async_trait]
    impl InboxSink for CapturingSink {
        async fn deliver(&self, envelope: Value) -> crate::domain::errors::DomainResult<()> {
            *self.captured.lock().unwrap() = Some(envelope);
            Ok(())
        }
    }

    #[tokio::test]
    async fn inbox_envelope_carries_swarm_result_type_and_metadata() {
        let postback = Postback::new(PostbackConfig::default());
        let mut state = SwarmState::new();
        state.final_result = Some("All tasks done.\nsome more detail".to_string());
        state.metrics.total_tasks = 3;
        state.metrics.completed = 2;
        state.metrics.failed = 1;
        state.metrics.tokens_used = 500;
        state.ended_at = Some(state.started_at + chrono::Duration::milliseconds(1500));

        let message = postback.build(PostbackFormat::Markdown, &state, &[], &[], &[]);
        let sink = CapturingSink { captured: std::sync::Mutex::new(None) };
        postback.create_inbox_message(&sink, &state, &message).await.unwrap();

        let envelope = sink.captured.lock().unwrap().clone().unwrap();
        assert_eq!(envelope["type"], "swarm_result");
        assert_eq!(envelope["title"], "All tasks done.");
        assert_eq!(envelope["metadata"]["totalTasks"], 3);
        assert_eq!(envelope["metadata"]["completed"], 2);
        assert_eq!(envelope["metadata"]["failed"], 1);
        assert_eq!(envelope["metadata"]["tokensUsed"], 500);
        assert_eq!(envelope["metadata"]["durationMs"], 1500);
    }
}
