//! Bounded-concurrency queue with retry/backoff.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use vault_protocol::{Task, TaskId, TaskKind, TaskQueueStatistics, TaskState};

#[derive(Debug, Clone, Copy)]
pub struct TaskQueueConfig {
    pub max_concurrent: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

pub enum Outcome {
    Success,
    Failure(String),
}

/// Work-stealing-free bounded queue. Order of insertion is preserved
/// for `next()`'s pending-task selection, matching `add(tasks)`
/// appending in order.
pub struct TaskQueue {
    config: TaskQueueConfig,
    order: VecDeque<TaskId>,
    tasks: std::collections::HashMap<TaskId, Task>,
    next_id: TaskId,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            config,
            order: VecDeque::new(),
            tasks: std::collections::HashMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> TaskQueueConfig {
        self.config
    }

    /// `add(tasks)`: appends in order, assigning task ids.
    pub fn add(&mut self, paths: Vec<(std::path::PathBuf, TaskKind, u64)>) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(paths.len());
        for (path, kind, file_size) in paths {
            let id = self.next_id;
            self.next_id += 1;
            let task = Task::new(id, path, kind, file_size, self.config.max_retries);
            self.tasks.insert(id, task);
            self.order.push_back(id);
            ids.push(id);
        }
        ids
    }

    fn in_progress_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::InProgress)
            .count()
    }

    /// Promotes any `RetryScheduled` task whose deadline has elapsed
    /// back to `Pending`, so `next()` can consider it.
    fn promote_due_retries(&mut self) {
        let now = now_epoch_ms();
        for task in self.tasks.values_mut() {
            if let TaskState::RetryScheduled { at_epoch_ms } = task.state {
                if at_epoch_ms <= now {
                    task.state = TaskState::Pending;
                }
            }
        }
    }

    /// `next()`: returns a pending task only if `in_progress < max_concurrent`
    /// (invariant: `in_progress <= max_concurrent` always holds).
    pub fn next(&mut self) -> Option<Task> {
        self.promote_due_retries();
        if self.in_progress_count() >= self.config.max_concurrent as usize {
            return None;
        }
        let id = self
            .order
            .iter()
            .find(|id| matches!(self.tasks.get(*id).map(|t| &t.state), Some(TaskState::Pending)))
            .copied()?;
        let task = self.tasks.get_mut(&id).expect("task present in order list");
        task.state = TaskState::InProgress;
        Some(task.clone())
    }

    /// `updateStatus`: on failure, reschedules with exponential backoff
    /// while `retry_count < max_retries`, else marks failed terminally.
    pub fn update_status(&mut self, task_id: TaskId, outcome: Outcome) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        match outcome {
            Outcome::Success => task.state = TaskState::Succeeded,
            Outcome::Failure(_message) => {
                if task.retry_count < task.max_retries {
                    let backoff_ms = self.config.retry_delay_ms * (1u64 << task.retry_count);
                    task.retry_count += 1;
                    task.state = TaskState::RetryScheduled {
                        at_epoch_ms: now_epoch_ms() + backoff_ms,
                    };
                } else {
                    task.state = TaskState::Failed;
                }
            }
        }
    }

    /// Records embed/parse progress for an in-flight task, consumed by
    /// the weighted progress formula.
    pub fn record_progress(&mut self, task_id: TaskId, processed_chunks: u32, total_chunks: u32) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.processed_chunks = processed_chunks;
            task.total_chunks = total_chunks;
        }
    }

    pub fn statistics(&self) -> TaskQueueStatistics {
        let mut stats = TaskQueueStatistics {
            total: self.tasks.len(),
            pending: 0,
            in_progress: 0,
            retrying: 0,
            succeeded: 0,
            failed: 0,
        };
        for task in self.tasks.values() {
            match task.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::InProgress => stats.in_progress += 1,
                TaskState::RetryScheduled { .. } => stats.retrying += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn is_drained(&self) -> bool {
        self.tasks.values().all(|t| {
            matches!(t.state, TaskState::Succeeded | TaskState::Failed)
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// `clearAll()`: used for fail-fast on model-load errors.
    pub fn clear_all(&mut self) {
        self.order.clear();
        self.tasks.clear();
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn queue(max_concurrent: u32) -> TaskQueue {
        TaskQueue::new(TaskQueueConfig {
            max_concurrent,
            max_retries: 3,
            retry_delay_ms: 1000,
        })
    }

    #[test]
    fn next_respects_concurrency_cap() {
        let mut q = queue(2);
        q.add(vec![
            (PathBuf::from("a"), TaskKind::Create, 1),
            (PathBuf::from("b"), TaskKind::Create, 1),
            (PathBuf::from("c"), TaskKind::Create, 1),
        ]);
        assert!(q.next().is_some());
        assert!(q.next().is_some());
        assert!(q.next().is_none(), "third task must wait for a slot");
    }

    #[test]
    fn failure_below_retry_cap_schedules_backoff_not_terminal_failure() {
        let mut q = queue(4);
        let ids = q.add(vec![(PathBuf::from("a"), TaskKind::Create, 1)]);
        q.next().unwrap();
        q.update_status(ids[0], Outcome::Failure("boom".into()));
        let stats = q.statistics();
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn exhausting_retries_marks_task_failed_terminally() {
        let mut q = queue(4);
        let ids = q.add(vec![(PathBuf::from("a"), TaskKind::Create, 1)]);
        for _ in 0..4 {
            q.next();
            q.update_status(ids[0], Outcome::Failure("boom".into()));
        }
        let stats = q.statistics();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retrying, 0);
    }

    #[test]
    fn statistics_count_all_ten_tasks_and_respect_cap() {
        let mut q = queue(2);
        let paths: Vec<_> = (0..10)
            .map(|i| (PathBuf::from(format!("f{i}")), TaskKind::Create, 1))
            .collect();
        let ids = q.add(paths);
        let mut in_flight = Vec::new();
        while let Some(t) = q.next() {
            in_flight.push(t.id);
        }
        assert!(in_flight.len() <= 2);
        for id in in_flight {
            q.update_status(id, Outcome::Success);
        }
        while let Some(t) = q.next() {
            q.update_status(t.id, Outcome::Success);
        }
        let stats = q.statistics();
        assert_eq!(stats.total, ids.len());
        assert_eq!(stats.succeeded, ids.len());
    }
}
