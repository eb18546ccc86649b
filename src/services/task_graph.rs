//! Task Graph: an in-memory DAG of [`Task`]s.
//!
//! Maintains a task map plus forward/reverse adjacency, grounded on the
//! teacher's wave-stripping approach in `dag_executor.rs` generalized into
//! a standalone, dependency-free graph structure (no repositories, no
//! substrate — this component owns nothing but the graph).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskId, TaskStatus, DEFAULT_PRIORITY};

/// In-memory DAG of tasks. Not thread-safe on its own; callers that share
/// a graph across tasks wrap it in `Arc<RwLock<TaskGraph>>` (the dispatcher
/// does this).
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    /// id -> ids that depend on it.
    forward: HashMap<TaskId, HashSet<TaskId>>,
    /// id -> ids it depends on (mirrors `Task::depends_on`, kept for fast lookup).
    reverse: HashMap<TaskId, BTreeSet<TaskId>>,
    insertion_order: Vec<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicate ids; defaults role=worker, priority=3.
    /// Dependencies referencing ids not (yet) present in the graph are kept
    /// as-is here; [`crate::services::graph_builder::GraphBuilder`] is
    /// responsible for dropping truly unresolvable refs before tasks reach
    /// the graph.
    pub fn add_task(&mut self, mut task: Task) -> DomainResult<TaskId> {
        if self.tasks.contains_key(&task.id) {
            return Err(DomainError::DuplicateTask(task.id));
        }
        if task.priority == 0 {
            task.priority = DEFAULT_PRIORITY;
        }
        let id = task.id;
        for dep in &task.depends_on {
            self.forward.entry(*dep).or_default().insert(id);
        }
        self.reverse.insert(id, task.depends_on.clone());
        self.forward.entry(id).or_default();
        self.insertion_order.push(id);
        self.tasks.insert(id, task);
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.insertion_order.iter().copied()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.insertion_order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn deps_of(&self, id: TaskId) -> &BTreeSet<TaskId> {
        static EMPTY: std::sync::OnceLock<BTreeSet<TaskId>> = std::sync::OnceLock::new();
        self.reverse.get(&id).unwrap_or_else(|| EMPTY.get_or_init(BTreeSet::new))
    }

    /// `getReadyTasks` — pending tasks whose every dep is completed, sorted
    /// by ascending priority then insertion order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        let mut ready: Vec<TaskId> = self
            .insertion_order
            .iter()
            .copied()
            .filter(|id| {
                let Some(task) = self.tasks.get(id) else { return false };
                task.status == TaskStatus::Pending
                    && self
                        .deps_of(*id)
                        .iter()
                        .all(|dep| self.tasks.get(dep).is_some_and(|d| d.status == TaskStatus::Completed))
            })
            .collect();
        ready.sort_by_key(|id| {
            let priority = self.tasks[id].priority;
            let order = self.insertion_order.iter().position(|x| x == id).unwrap_or(usize::MAX);
            (priority, order)
        });
        ready
    }

    /// `markBlockedTasks` — any pending task whose any dep is in
    /// {failed, blocked, cancelled} transitions to blocked. Returns newly
    /// blocked ids.
    pub fn mark_blocked_tasks(&mut self) -> Vec<TaskId> {
        let mut newly_blocked = Vec::new();
        let candidates: Vec<TaskId> = self
            .insertion_order
            .iter()
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|t| t.status == TaskStatus::Pending))
            .collect();
        for id in candidates {
            let deps = self.deps_of(id).clone();
            let blocked_by_dep = deps
                .iter()
                .any(|dep| self.tasks.get(dep).is_some_and(|d| d.status.is_failure_like()));
            if blocked_by_dep {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.transition_to(TaskStatus::Blocked);
                    newly_blocked.push(id);
                }
            }
        }
        newly_blocked
    }

    /// `hasCycles` — DFS with recursion stack; true iff a back edge exists.
    pub fn has_cycles(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<TaskId, Mark> = HashMap::new();

        fn visit(
            id: TaskId,
            graph: &TaskGraph,
            marks: &mut HashMap<TaskId, Mark>,
        ) -> bool {
            match marks.get(&id) {
                Some(Mark::Visiting) => return true,
                Some(Mark::Done) => return false,
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            for dep in graph.deps_of(id) {
                if visit(*dep, graph, marks) {
                    return true;
                }
            }
            marks.insert(id, Mark::Done);
            false
        }

        self.insertion_order.iter().any(|id| visit(*id, self, &mut marks))
    }

    /// `getTopologicalOrder` — Kahn's algorithm over reverse adjacency. If
    /// cycles exist, returns a prefix; callers must check [`Self::has_cycles`]
    /// first if they need a guarantee of completeness.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut indegree: HashMap<TaskId, usize> = self
            .insertion_order
            .iter()
            .map(|id| (*id, self.deps_of(*id).len()))
            .collect();
        let mut queue: std::collections::VecDeque<TaskId> = self
            .insertion_order
            .iter()
            .copied()
            .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(dependents) = self.forward.get(&id) {
                let mut newly_ready: Vec<TaskId> = Vec::new();
                for dep in dependents {
                    if let Some(count) = indegree.get_mut(dep) {
                        *count -= 1;
                        if *count == 0 {
                            newly_ready.push(*dep);
                        }
                    }
                }
                newly_ready.sort_by_key(|id| {
                    self.insertion_order.iter().position(|x| x == id).unwrap_or(usize::MAX)
                });
                queue.extend(newly_ready);
            }
        }
        order
    }

    /// `getExecutionLevels` — iteratively strip zero-indegree tasks; each
    /// stripped set is one level (tasks within a level may run concurrently).
    /// Deterministic given insertion order.
    pub fn execution_levels(&self) -> Vec<Vec<TaskId>> {
        let mut remaining_deps: HashMap<TaskId, BTreeSet<TaskId>> = self
            .insertion_order
            .iter()
            .map(|id| (*id, self.deps_of(*id).clone()))
            .collect();
        let mut levels = Vec::new();

        while !remaining_deps.is_empty() {
            let mut level: Vec<TaskId> = remaining_deps
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if level.is_empty() {
                // Cycle: stop to avoid an infinite loop; caller should have
                // checked `has_cycles` first.
                break;
            }
            level.sort_by_key(|id| {
                self.insertion_order.iter().position(|x| x == id).unwrap_or(usize::MAX)
            });
            for id in &level {
                remaining_deps.remove(id);
            }
            for deps in remaining_deps.values_mut() {
                for id in &level {
                    deps.remove(id);
                }
            }
            levels.push(level);
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Task;

    fn task() -> Task {
        Task::new("work")
    }

    #[test]
    fn add_task_rejects_duplicate_id() {
        let mut g = TaskGraph::new();
        let t = task();
        let id = t.id;
        g.add_task(t.clone()).unwrap();
        let err = g.add_task(t).unwrap_err();
        assert!(matches!(err, DomainError::DuplicateTask(i) if i == id));
    }

    #[test]
    fn ready_tasks_respects_priority_then_insertion_order() {
        let mut g = TaskGraph::new();
        let low = task().with_priority(5);
        let high = task().with_priority(1);
        let mid = task().with_priority(3);
        g.add_task(low.clone()).unwrap();
        g.add_task(high.clone()).unwrap();
        g.add_task(mid.clone()).unwrap();
        let ready = g.ready_tasks();
        assert_eq!(ready, vec![high.id, mid.id, low.id]);
    }

    #[test]
    fn ready_tasks_excludes_unmet_dependencies() {
        let mut g = TaskGraph::new();
        let a = task();
        let a_id = a.id;
        g.add_task(a).unwrap();
        let b = task().with_depends_on([a_id]);
        let b_id = b.id;
        g.add_task(b).unwrap();

        assert_eq!(g.ready_tasks(), vec![a_id]);

        g.get_mut(a_id).unwrap().transition_to(TaskStatus::Completed);
        assert_eq!(g.ready_tasks(), vec![b_id]);
    }

    #[test]
    fn mark_blocked_cascades_from_failed_dependency() {
        let mut g = TaskGraph::new();
        let a = task();
        let a_id = a.id;
        g.add_task(a).unwrap();
        let b = task().with_depends_on([a_id]);
        let b_id = b.id;
        g.add_task(b).unwrap();

        g.get_mut(a_id).unwrap().transition_to(TaskStatus::Failed);
        let blocked = g.mark_blocked_tasks();
        assert_eq!(blocked, vec![b_id]);
        assert_eq!(g.get(b_id).unwrap().status, TaskStatus::Blocked);
        assert!(g.get(b_id).unwrap().started_at.is_none());
    }

    #[test]
    fn has_cycles_detects_back_edge() {
        let mut g = TaskGraph::new();
        let a = task();
        let b = task().with_depends_on([a.id]);
        let a_id = a.id;
        let b_id = b.id;
        g.add_task(a).unwrap();
        g.add_task(b).unwrap();
        assert!(!g.has_cycles());

        // Manually introduce a cycle a -> b -> a via reverse map (simulating
        // a malformed graph built outside GraphBuilder's validation).
        g.reverse.get_mut(&a_id).unwrap().insert(b_id);
        g.forward.entry(b_id).or_default().insert(a_id);
        assert!(g.has_cycles());
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = TaskGraph::new();
        let a = task();
        let a_id = a.id;
        g.add_task(a).unwrap();
        let b = task().with_depends_on([a_id]);
        let b_id = b.id;
        g.add_task(b).unwrap();
        let c = task().with_depends_on([b_id]);
        let c_id = c.id;
        g.add_task(c).unwrap();

        let order = g.topological_order();
        assert_eq!(order, vec![a_id, b_id, c_id]);
    }

    #[test]
    fn execution_levels_group_independent_tasks() {
        let mut g = TaskGraph::new();
        let a = task();
        let a_id = a.id;
        g.add_task(a).unwrap();
        let b = task();
        let b_id = b.id;
        g.add_task(b).unwrap();
        let c = task().with_depends_on([a_id, b_id]);
        let c_id = c.id;
        g.add_task(c).unwrap();

        let levels = g.execution_levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![a_id, b_id]);
        assert_eq!(levels[1], vec![c_id]);
    }
}
