//! Graph Builder: constructs [`TaskGraph`]s from planner output or
//! list/pipeline/fan-out/fan-in templates.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Role, Task, TaskId};
use crate::services::extract_json_from_response;
use crate::services::task_graph::TaskGraph;

/// One task as the planner emits it: `dependsOn` entries may reference
/// either the integer position of another planner task or a string id.
#[derive(Debug, Clone, Deserialize)]
struct RawPlannerTask {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default, rename = "dependsOn")]
    depends_on: Vec<Value>,
    #[serde(default, rename = "requiredTools")]
    required_tools: Option<Vec<String>>,
    #[serde(default)]
    checkpoint: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPlannerOutput {
    tasks: Vec<RawPlannerTask>,
}

fn parse_role(raw: Option<&str>) -> Role {
    match raw.map(str::to_lowercase).as_deref() {
        Some("planner") => Role::Planner,
        Some("critic") => Role::Critic,
        Some("aggregator") => Role::Aggregator,
        _ => Role::Worker,
    }
}

#[derive(Debug, Clone)]
pub struct GraphBuilderConfig {
    pub max_tasks: usize,
    pub insert_critic_per_checkpoint: bool,
    pub insert_aggregation_task: bool,
}

impl Default for GraphBuilderConfig {
    fn default() -> Self {
        Self {
            max_tasks: 50,
            insert_critic_per_checkpoint: false,
            insert_aggregation_task: false,
        }
    }
}

pub struct GraphBuilder {
    config: GraphBuilderConfig,
}

impl GraphBuilder {
    pub fn new(config: GraphBuilderConfig) -> Self {
        Self { config }
    }

    /// `parsePlannerOutput`: extracts the first JSON array or object; an
    /// array is interpreted as `{tasks: array}`, an object must already
    /// carry a `tasks` array.
    pub fn parse_planner_output(&self, text: &str) -> DomainResult<RawPlannerOutputParsed> {
        let candidate = extract_json_from_response(text);
        let value: Value = serde_json::from_str(candidate)
            .map_err(|e| DomainError::PlanParseError(e.to_string()))?;

        let tasks_value = match value {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut map) => map
                .remove("tasks")
                .ok_or_else(|| DomainError::PlanParseError("object output has no `tasks` array".into()))?,
            _ => return Err(DomainError::PlanParseError("planner output is neither array nor object".into())),
        };

        let raw: RawPlannerOutput = serde_json::from_value(serde_json::json!({ "tasks": tasks_value }))
            .map_err(|e| DomainError::PlanParseError(e.to_string()))?;

        Ok(RawPlannerOutputParsed(raw))
    }

    /// `buildFromPlannerOutput`: enforces `maxTasks`, mints ids, resolves
    /// `dependsOn` (index-into-generated-ids, or an existing string id;
    /// unresolvable entries are dropped), and optionally threads in critic
    /// and aggregation tasks.
    pub fn build_from_planner_output(&self, parsed: &RawPlannerOutputParsed) -> DomainResult<TaskGraph> {
        let raw_tasks = &parsed.0.tasks;
        if raw_tasks.len() > self.config.max_tasks {
            return Err(DomainError::Configuration(format!(
                "planner produced {} tasks, exceeding maxTasks {}",
                raw_tasks.len(),
                self.config.max_tasks
            )));
        }

        let generated_ids: Vec<TaskId> = raw_tasks.iter().map(|_| TaskId::new()).collect();
        let id_by_string: std::collections::HashMap<&str, TaskId> = raw_tasks
            .iter()
            .zip(&generated_ids)
            .filter_map(|(t, id)| t.id.as_deref().map(|s| (s, *id)))
            .collect();

        let mut graph = TaskGraph::new();
        let mut checkpoints = Vec::new();
        let mut leaves: BTreeSet<TaskId> = BTreeSet::new();

        for (idx, raw) in raw_tasks.iter().enumerate() {
            let id = generated_ids[idx];
            let depends_on: BTreeSet<TaskId> = raw
                .depends_on
                .iter()
                .filter_map(|v| resolve_dependency(v, &generated_ids, &id_by_string))
                .collect();

            let mut task = Task::new(raw.description.clone())
                .with_id(id)
                .with_role(parse_role(raw.role.as_deref()))
                .with_depends_on(depends_on.clone());
            if let Some(priority) = raw.priority {
                task = task.with_priority(priority);
            }
            if let Some(tools) = &raw.required_tools {
                task = task.with_required_tools(tools.clone());
            }

            if raw.checkpoint {
                checkpoints.push(id);
            }
            leaves.insert(id);
            for dep in &depends_on {
                leaves.remove(dep);
            }

            graph.add_task(task)?;
        }

        if self.config.insert_critic_per_checkpoint {
            for checkpoint_id in checkpoints {
                let critic_task = Task::new(format!("review checkpoint task {checkpoint_id}"))
                    .with_role(Role::Critic)
                    .with_depends_on([checkpoint_id]);
                let critic_id = critic_task.id;
                graph.add_task(critic_task)?;
                leaves.insert(critic_id);
            }
        }

        if self.config.insert_aggregation_task && !leaves.is_empty() {
            let aggregation_task = Task::new("aggregate completed subtask results")
                .with_role(Role::Aggregator)
                .with_depends_on(leaves.iter().copied());
            graph.add_task(aggregation_task)?;
        }

        Ok(graph)
    }

    pub fn build_from_task_list(&self, descriptions: Vec<String>) -> DomainResult<TaskGraph> {
        let mut graph = TaskGraph::new();
        for desc in descriptions {
            graph.add_task(Task::new(desc))?;
        }
        Ok(graph)
    }

    /// Strictly sequential chain: task N depends on task N-1.
    pub fn build_pipeline(&self, descriptions: Vec<String>) -> DomainResult<TaskGraph> {
        let mut graph = TaskGraph::new();
        let mut previous: Option<TaskId> = None;
        for desc in descriptions {
            let mut task = Task::new(desc);
            if let Some(prev) = previous {
                task = task.with_depends_on([prev]);
            }
            let id = task.id;
            graph.add_task(task)?;
            previous = Some(id);
        }
        Ok(graph)
    }

    /// One root task, then N independent tasks depending on it, optionally
    /// followed by a merge task depending on all of them.
    pub fn build_fan_out(
        &self,
        root: String,
        parallel: Vec<String>,
        merge: Option<String>,
    ) -> DomainResult<TaskGraph> {
        let mut graph = TaskGraph::new();
        let root_task = Task::new(root);
        let root_id = root_task.id;
        graph.add_task(root_task)?;

        let mut parallel_ids = Vec::with_capacity(parallel.len());
        for desc in parallel {
            let task = Task::new(desc).with_depends_on([root_id]);
            let id = task.id;
            graph.add_task(task)?;
            parallel_ids.push(id);
        }

        if let Some(merge_desc) = merge {
            let merge_task = Task::new(merge_desc).with_role(Role::Aggregator).with_depends_on(parallel_ids);
            graph.add_task(merge_task)?;
        }

        Ok(graph)
    }

    /// N independent tasks, all feeding into one merge task.
    pub fn build_fan_in(&self, parallel: Vec<String>, merge: String) -> DomainResult<TaskGraph> {
        let mut graph = TaskGraph::new();
        let mut parallel_ids = Vec::with_capacity(parallel.len());
        for desc in parallel {
            let task = Task::new(desc);
            let id = task.id;
            graph.add_task(task)?;
            parallel_ids.push(id);
        }
        let merge_task = Task::new(merge).with_role(Role::Aggregator).with_depends_on(parallel_ids);
        graph.add_task(merge_task)?;
        Ok(graph)
    }
}

/// Opaque parsed-planner-output handle, kept distinct from `Value` so
/// callers can't accidentally skip [`GraphBuilder::parse_planner_output`]'s
/// validation.
pub struct RawPlannerOutputParsed(RawPlannerOutput);

fn resolve_dependency(
    value: &Value,
    generated_ids: &[TaskId],
    id_by_string: &std::collections::HashMap<&str, TaskId>,
) -> Option<TaskId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|i| generated_ids.get(i as usize).copied()),
        Value::String(s) => id_by_string.get(s.as_str()).copied(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_array_as_tasks() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default());
        let text = r#"[{"description": "do a"}, {"description": "do b", "dependsOn": [0]}]"#;
        let parsed = builder.parse_planner_output(text).unwrap();
        let graph = builder.build_from_planner_output(&parsed).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.execution_levels().len(), 2);
    }

    #[test]
    fn parses_fenced_json_object_with_tasks_key() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default());
        let text = "```json\n{\"tasks\": [{\"description\": \"only task\"}]}\n```";
        let parsed = builder.parse_planner_output(text).unwrap();
        let graph = builder.build_from_planner_output(&parsed).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn unresolvable_dependency_is_dropped_not_errored() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default());
        let text = r#"{"tasks": [{"description": "a", "dependsOn": [99, "ghost"]}]}"#;
        let parsed = builder.parse_planner_output(text).unwrap();
        let graph = builder.build_from_planner_output(&parsed).unwrap();
        let only = graph.tasks().next().unwrap();
        assert!(only.depends_on.is_empty());
    }

    #[test]
    fn exceeding_max_tasks_errors() {
        let builder = GraphBuilder::new(GraphBuilderConfig { max_tasks: 1, ..Default::default() });
        let text = r#"[{"description": "a"}, {"description": "b"}]"#;
        let parsed = builder.parse_planner_output(text).unwrap();
        let err = builder.build_from_planner_output(&parsed).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn build_fan_out_wires_root_and_merge() {
        let builder = GraphBuilder::new(GraphBuilderConfig::default());
        let graph = builder
            .build_fan_out("root".into(), vec!["a".into(), "b".into()], Some("merge".into()))
            .unwrap();
        assert_eq!(graph.len(), 4);
        let levels = graph.execution_levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[2].len(), 1);
    }
}
