//! Aggregator: combines partial subtask outputs into one coherent result.

use std::collections::HashMap;

use crate::domain::models::{SubResult, TaskId};
use crate::services::overseers::CriticSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Concatenate,
    Merge,
    Json,
    Structured,
}

/// One `{task, result, order}` input triple.
#[derive(Debug, Clone)]
pub struct AggregatorInput {
    pub task_id: TaskId,
    pub result: SubResult,
    pub order: u32,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub heading: String,
    pub content: String,
    pub source_task_ids: Vec<TaskId>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub content: String,
    pub sections: Vec<Section>,
    pub confidence: f64,
    pub coverage: f64,
    pub contributing_tasks: usize,
    pub failed_tasks: usize,
    pub conflict_count: usize,
    pub dedup_count: usize,
    pub warnings: Vec<String>,
}

impl AggregatedResult {
    pub fn as_critic_sections(&self) -> Vec<CriticSection> {
        self.sections
            .iter()
            .map(|s| CriticSection {
                heading: s.heading.clone(),
                content: s.content.clone(),
                source_task_ids: s.source_task_ids.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub strategy: Strategy,
    pub separator: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Concatenate,
            separator: "\n\n---\n\n".to_string(),
        }
    }
}

pub struct Aggregator {
    config: AggregatorConfig,
}

/// `calculateResultConfidence`: a result with tool calls and multiple turns
/// is treated as more deliberate, and failed/empty results score zero.
fn calculate_result_confidence(result: &SubResult) -> f64 {
    if !result.success {
        return 0.0;
    }
    let has_content = result.result.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has_content {
        return 0.0;
    }
    let turn_factor = (result.turns as f64 / 5.0).min(1.0);
    let tool_factor = if result.tool_calls > 0 { 0.2 } else { 0.0 };
    (0.6 + 0.2 * turn_factor + tool_factor).min(1.0)
}

fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a result's content into headed sections. A "heading" is any line
/// starting with `#` (markdown-style); content before the first heading
/// becomes an unheaded section with heading `""`.
fn split_into_sections(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut current_heading = String::new();
    let mut current_body = String::new();

    for line in content.lines() {
        if let Some(heading) = line.trim_start().strip_prefix('#') {
            if !current_body.trim().is_empty() || !current_heading.is_empty() {
                sections.push((current_heading.clone(), current_body.trim().to_string()));
            }
            current_heading = heading.trim_start_matches('#').trim().to_string();
            current_body.clear();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if !current_body.trim().is_empty() || !current_heading.is_empty() {
        sections.push((current_heading, current_body.trim().to_string()));
    }
    if sections.is_empty() {
        sections.push((String::new(), content.trim().to_string()));
    }
    sections
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(&self, inputs: &[AggregatorInput]) -> AggregatedResult {
        let total = inputs.len();
        let successful: Vec<&AggregatorInput> = inputs
            .iter()
            .filter(|i| i.result.success && i.result.result.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .collect();
        let failed_count = total - successful.len();

        if successful.is_empty() {
            return AggregatedResult {
                content: String::new(),
                sections: Vec::new(),
                confidence: 0.0,
                coverage: 0.0,
                contributing_tasks: 0,
                failed_tasks: failed_count,
                conflict_count: 0,
                dedup_count: 0,
                warnings: vec![format!("{failed_count} of {total} task(s) failed or returned empty output")],
            };
        }

        match self.config.strategy {
            Strategy::Concatenate => self.aggregate_concatenate(&successful, total, failed_count),
            Strategy::Merge => self.aggregate_merge(&successful, total, failed_count),
            Strategy::Json | Strategy::Structured => self.aggregate_structured(&successful, total, failed_count),
        }
    }

    fn confidences(&self, inputs: &[&AggregatorInput]) -> HashMap<TaskId, f64> {
        inputs
            .iter()
            .map(|i| (i.task_id, calculate_result_confidence(&i.result)))
            .collect()
    }

    fn overall_confidence(&self, inputs: &[&AggregatorInput], confidences: &HashMap<TaskId, f64>) -> f64 {
        if inputs.is_empty() {
            return 0.0;
        }
        let sum: f64 = inputs.iter().map(|i| confidences[&i.task_id]).sum();
        sum / inputs.len() as f64
    }

    fn aggregate_concatenate(
        &self,
        inputs: &[&AggregatorInput],
        total: usize,
        failed: usize,
    ) -> AggregatedResult {
        let mut ordered = inputs.to_vec();
        ordered.sort_by_key(|i| i.order);
        let confidences = self.confidences(&ordered);

        let content = ordered
            .iter()
            .map(|i| i.result.result.as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&self.config.separator);

        let sections: Vec<Section> = ordered
            .iter()
            .map(|i| Section {
                heading: String::new(),
                content: i.result.result.clone().unwrap_or_default(),
                source_task_ids: vec![i.task_id],
                confidence: confidences[&i.task_id],
            })
            .collect();

        let confidence = self.overall_confidence(&ordered, &confidences) * (ordered.len() as f64 / total as f64);

        AggregatedResult {
            content,
            sections,
            confidence,
            coverage: ordered.len() as f64 / total as f64,
            contributing_tasks: ordered.len(),
            failed_tasks: failed,
            conflict_count: 0,
            dedup_count: 0,
            warnings: Vec::new(),
        }
    }

    fn aggregate_merge(&self, inputs: &[&AggregatorInput], total: usize, failed: usize) -> AggregatedResult {
        let confidences = self.confidences(inputs);

        // group sections by normalized heading, preserving first-seen order.
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<(TaskId, String, String)>> = HashMap::new();

        for input in inputs {
            let content = input.result.result.as_deref().unwrap_or_default();
            for (heading, body) in split_into_sections(content) {
                let key = heading.to_lowercase();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push((input.task_id, heading, body));
            }
        }

        let mut sections = Vec::new();
        let mut conflict_count = 0;
        let mut dedup_count = 0;

        for key in order {
            let entries = &groups[&key];
            let mut seen_content: Vec<String> = Vec::new();
            let mut distinct: Vec<&(TaskId, String, String)> = Vec::new();
            for entry in entries {
                let normalized = normalize(&entry.2);
                if seen_content.contains(&normalized) {
                    dedup_count += 1;
                } else {
                    seen_content.push(normalized);
                    distinct.push(entry);
                }
            }

            let heading = distinct.first().map(|e| e.1.clone()).unwrap_or_default();
            let source_task_ids: Vec<TaskId> = distinct.iter().map(|e| e.0).collect();

            let (winning_content, winning_confidence) = if distinct.len() > 1 {
                conflict_count += 1;
                distinct
                    .iter()
                    .map(|e| (e.2.clone(), confidences.get(&e.0).copied().unwrap_or(0.0)))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .unwrap()
            } else {
                let e = distinct[0];
                (e.2.clone(), confidences.get(&e.0).copied().unwrap_or(0.0))
            };

            sections.push(Section {
                heading,
                content: winning_content,
                source_task_ids,
                confidence: winning_confidence,
            });
        }

        let content = sections
            .iter()
            .map(|s| {
                if s.heading.is_empty() {
                    s.content.clone()
                } else {
                    format!("# {}\n{}", s.heading, s.content)
                }
            })
            .collect::<Vec<_>>()
            .join(&self.config.separator);

        let confidence = self.overall_confidence(inputs, &confidences) * (inputs.len() as f64 / total as f64);

        AggregatedResult {
            content,
            sections,
            confidence,
            coverage: inputs.len() as f64 / total as f64,
            contributing_tasks: inputs.len(),
            failed_tasks: failed,
            conflict_count,
            dedup_count,
            warnings: Vec::new(),
        }
    }

    fn aggregate_structured(
        &self,
        inputs: &[&AggregatorInput],
        total: usize,
        failed: usize,
    ) -> AggregatedResult {
        let confidences = self.confidences(inputs);
        let record: serde_json::Map<String, serde_json::Value> = inputs
            .iter()
            .map(|i| {
                (
                    i.task_id.to_string(),
                    serde_json::json!({
                        "result": i.result.result,
                        "order": i.order,
                        "confidence": confidences[&i.task_id],
                    }),
                )
            })
            .collect();

        let content = serde_json::Value::Object(record).to_string();
        let sections: Vec<Section> = inputs
            .iter()
            .map(|i| Section {
                heading: i.task_id.to_string(),
                content: i.result.result.clone().unwrap_or_default(),
                source_task_ids: vec![i.task_id],
                confidence: confidences[&i.task_id],
            })
            .collect();

        let confidence = self.overall_confidence(inputs, &confidences) * (inputs.len() as f64 / total as f64);

        AggregatedResult {
            content,
            sections,
            confidence,
            coverage: inputs.len() as f64 / total as f64,
            contributing_tasks: inputs.len(),
            failed_tasks: failed,
            conflict_count: 0,
            dedup_count: 0,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(order: u32, content: &str, success: bool) -> AggregatorInput {
        AggregatorInput {
            task_id: TaskId::new(),
            result: if success {
                SubResult::ok("s", content)
            } else {
                SubResult::err("s", "boom")
            },
            order,
        }
    }

    #[test]
    fn empty_inputs_yield_zero_confidence_and_warning() {
        let aggregator = Aggregator::new(AggregatorConfig::default());
        let result = aggregator.aggregate(&[input(0, "", false)]);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.contributing_tasks, 0);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn concatenate_preserves_order() {
        let aggregator = Aggregator::new(AggregatorConfig { strategy: Strategy::Concatenate, ..Default::default() });
        let inputs = vec![input(1, "second", true), input(0, "first", true)];
        let result = aggregator.aggregate(&inputs);
        let first_pos = result.content.find("first").unwrap();
        let second_pos = result.content.find("second").unwrap();
        assert!(first_pos < second_pos);
    }

    #[test]
    fn merge_detects_conflicting_sections() {
        let aggregator = Aggregator::new(AggregatorConfig { strategy: Strategy::Merge, ..Default::default() });
        let inputs = vec![
            input(0, "# Summary\nAlpha approach taken.", true),
            input(1, "# Summary\nBeta approach taken instead.", true),
        ];
        let result = aggregator.aggregate(&inputs);
        assert_eq!(result.conflict_count, 1);
    }

    #[test]
    fn merge_deduplicates_identical_sections() {
        let aggregator = Aggregator::new(AggregatorConfig { strategy: Strategy::Merge, ..Default::default() });
        let inputs = vec![
            input(0, "# Summary\nSame   content", true),
            input(1, "# Summary\nSame content", true),
        ];
        let result = aggregator.aggregate(&inputs);
        assert_eq!(result.dedup_count, 1);
        assert_eq!(result.conflict_count, 0);
    }

    #[test]
    fn coverage_reflects_failed_tasks() {
        let aggregator = Aggregator::new(AggregatorConfig::default());
        let inputs = vec![input(0, "ok", true), input(1, "", false)];
        let result = aggregator.aggregate(&inputs);
        assert_eq!(result.coverage, 0.5);
        assert_eq!(result.failed_tasks, 1);
    }
}
