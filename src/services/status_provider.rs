//! Status Provider: display-friendly task/agent state, progress, and
//! formatted rendering. Bar/percent/fraction/spinner output is built with
//! plain string formatting rather than a terminal-styling crate, since this
//! is a library with no terminal surface of its own.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::models::{Task, TaskId, TaskStatus};

const LOG_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct TaskDisplay {
    pub task: Task,
    pub logs: VecDeque<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressStyle {
    Bar,
    Percent,
    Fraction,
    Spinner,
}

/// A listener is any closure the caller registers; failures are swallowed,
/// since listeners are best-effort.
pub type Listener = Arc<dyn Fn(&Task) + Send + Sync>;

pub struct StatusProvider {
    tasks: RwLock<std::collections::HashMap<TaskId, TaskDisplay>>,
    completion_durations: RwLock<Vec<f64>>,
    listeners: RwLock<Vec<Listener>>,
    spinner_frames: Vec<char>,
}

impl Default for StatusProvider {
    fn default() -> Self {
        Self {
            tasks: RwLock::new(std::collections::HashMap::new()),
            completion_durations: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            spinner_frames: vec!['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'],
        }
    }
}

impl StatusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listener(&self, listener: Listener) {
        self.listeners.write().await.push(listener);
    }

    /// `updateTask`: overwrites display state, appends a completion duration
    /// if this transition entered `Completed`, and invokes listeners.
    pub async fn update_task(&self, task: Task) {
        let was_completed = {
            let tasks = self.tasks.read().await;
            tasks.get(&task.id).is_some_and(|d| d.task.status == TaskStatus::Completed)
        };

        if !was_completed && task.status == TaskStatus::Completed {
            if let (Some(start), Some(end)) = (task.started_at, task.completed_at) {
                let secs = (end - start).num_milliseconds() as f64 / 1000.0;
                self.completion_durations.write().await.push(secs);
            }
        }

        {
            let mut tasks = self.tasks.write().await;
            let entry = tasks.entry(task.id).or_insert_with(|| TaskDisplay {
                task: task.clone(),
                logs: VecDeque::new(),
            });
            entry.task = task.clone();
        }

        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            // Best-effort: a panicking listener must not take down the
            // provider or block its siblings.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&task)));
        }
    }

    pub async fn append_log(&self, task_id: TaskId, line: impl Into<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(display) = tasks.get_mut(&task_id) {
            if display.logs.len() >= LOG_RING_CAPACITY {
                display.logs.pop_front();
            }
            display.logs.push_back(line.into());
        }
    }

    /// `getProgress`: round(completed/total * 100); 0 if no tasks.
    pub async fn get_progress(&self) -> u32 {
        let tasks = self.tasks.read().await;
        if tasks.is_empty() {
            return 0;
        }
        let completed = tasks.values().filter(|d| d.task.status == TaskStatus::Completed).count();
        ((completed as f64 / tasks.len() as f64) * 100.0).round() as u32
    }

    /// `estimateRemaining`: only meaningful with at least 2 completions.
    pub async fn estimate_remaining(&self) -> Option<chrono::Duration> {
        let durations = self.completion_durations.read().await;
        if durations.len() < 2 {
            return None;
        }
        let avg = durations.iter().sum::<f64>() / durations.len() as f64;

        let tasks = self.tasks.read().await;
        let remaining = tasks
            .values()
            .filter(|d| !d.task.status.is_terminal())
            .count();
        Some(chrono::Duration::milliseconds((avg * remaining as f64 * 1000.0) as i64))
    }

    pub async fn total_and_completed(&self) -> (usize, usize) {
        let tasks = self.tasks.read().await;
        let completed = tasks.values().filter(|d| d.task.status == TaskStatus::Completed).count();
        (tasks.len(), completed)
    }

    /// `formatProgress`: pure and deterministic except for `Spinner`, which
    /// derives its frame from wall-clock time.
    pub async fn format_progress(&self, style: ProgressStyle) -> String {
        let (total, completed) = self.total_and_completed().await;
        let percent = self.get_progress().await;

        match style {
            ProgressStyle::Percent => format!("{percent}%"),
            ProgressStyle::Fraction => format!("{completed}/{total}"),
            ProgressStyle::Bar => {
                let width = 20usize;
                let filled = ((percent as usize * width) / 100).min(width);
                format!("[{}{}] {percent}%", "#".repeat(filled), "-".repeat(width - filled))
            }
            ProgressStyle::Spinner => {
                let idx = (Utc::now().timestamp_millis() / 100) as usize % self.spinner_frames.len();
                format!("{} {completed}/{total}", self.spinner_frames[idx])
            }
        }
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskDisplay> {
        self.tasks.read().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_status(status: TaskStatus) -> Task {
        let mut t = Task::new("x");
        t.status = status;
        t
    }

    #[tokio::test]
    async fn progress_is_zero_with_no_tasks() {
        let provider = StatusProvider::new();
        assert_eq!(provider.get_progress().await, 0);
    }

    #[tokio::test]
    async fn progress_reflects_completed_ratio() {
        let provider = StatusProvider::new();
        provider.update_task(task_with_status(TaskStatus::Completed)).await;
        provider.update_task(task_with_status(TaskStatus::Pending)).await;
        assert_eq!(provider.get_progress().await, 50);
    }

    #[tokio::test]
    async fn estimate_remaining_requires_two_completions() {
        let provider = StatusProvider::new();
        let mut t = Task::new("x");
        t.transition_to(TaskStatus::Running);
        t.transition_to(TaskStatus::Completed);
        provider.update_task(t).await;
        assert!(provider.estimate_remaining().await.is_none());
    }

    #[tokio::test]
    async fn listener_errors_do_not_abort_other_listeners() {
        let provider = StatusProvider::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        provider
            .add_listener(Arc::new(move |_task| {
                calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }))
            .await;
        provider.update_task(Task::new("x")).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn format_progress_fraction() {
        let provider = StatusProvider::new();
        provider.update_task(task_with_status(TaskStatus::Completed)).await;
        provider.update_task(task_with_status(TaskStatus::Running)).await;
        assert_eq!(provider.format_progress(ProgressStyle::Fraction).await, "1/2");
    }
}
