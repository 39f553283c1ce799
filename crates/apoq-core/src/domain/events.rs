//! Events - ドメインイベント
//!
//! Emitted once per execution attempt, after the state write committed.

use super::{TaskError, TaskRecord, TaskState};

/// TaskEvent はタスク実行で発生したイベント
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The handler succeeded; `task` is the updated (completed) record.
    Completed { task: TaskRecord },

    /// The handler failed; `task` is the updated record (pending with a new
    /// `process_at`, or failed when retries are exhausted).
    Failed { task: TaskRecord, error: TaskError },
}

impl TaskEvent {
    pub fn task(&self) -> &TaskRecord {
        match self {
            TaskEvent::Completed { task } | TaskEvent::Failed { task, .. } => task,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskEvent::Completed { .. } => None,
            TaskEvent::Failed { error, .. } => Some(error),
        }
    }

    /// A failure that ended the task for good.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TaskEvent::Failed { task, .. } if task.state == TaskState::Failed)
    }

    /// Stable event name, for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Completed { .. } => "task.completed",
            TaskEvent::Failed { .. } => "task.failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskType};
    use chrono::Utc;

    fn record(state: TaskState) -> TaskRecord {
        let mut r = TaskRecord::new(TaskId::new(1), TaskType::new("t"), serde_json::json!({}), Utc::now());
        r.state = state;
        r
    }

    #[test]
    fn failed_event_reports_exhaustion_from_state() {
        let retrying = TaskEvent::Failed {
            task: record(TaskState::Pending),
            error: TaskError::new("boom"),
        };
        let exhausted = TaskEvent::Failed {
            task: record(TaskState::Failed),
            error: TaskError::new("boom"),
        };

        assert!(!retrying.is_exhausted());
        assert!(exhausted.is_exhausted());
        assert_eq!(exhausted.name(), "task.failed");
        assert_eq!(exhausted.error().map(TaskError::message), Some("boom"));
    }

    #[test]
    fn completed_event_has_no_error() {
        let ev = TaskEvent::Completed {
            task: record(TaskState::Completed),
        };
        assert!(ev.error().is_none());
        assert!(!ev.is_exhausted());
        assert_eq!(ev.task().id, TaskId::new(1));
    }
}
