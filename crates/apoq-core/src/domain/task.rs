use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TaskId, TaskState};

/// Routing key selecting the handler for a task. Matching is exact string
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A persisted task: the single source of truth for its lifecycle.
///
/// - `data` is immutable after creation.
/// - `completed_at` is set exactly once, on the transition to `Completed`.
/// - `fail_count` only ever increases.
/// - `process_at` only ever moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub data: serde_json::Value,
    pub state: TaskState,
    pub process_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub fail_count: u32,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A freshly enqueued task: pending, eligible at `now`, no failures.
    pub fn new(id: TaskId, task_type: TaskType, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type,
            data,
            state: TaskState::Pending,
            process_at: now,
            completed_at: None,
            fail_count: 0,
            created_at: now,
        }
    }

    /// Eligible for a claim at `now` (state and time only).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.process_at <= now
    }

    /// What the handler sees.
    pub fn envelope(&self) -> TaskEnvelope {
        TaskEnvelope::new(self.id, self.task_type.clone(), self.data.clone())
            .with_fail_count(self.fail_count)
    }
}

/// TaskType + Payload (+ TaskId) の"運搬用"データ。
///
/// Handlers receive this instead of the full record so they cannot observe or
/// depend on scheduling columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_id: TaskId,
    task_type: TaskType,
    payload: serde_json::Value,
    fail_count: u32,
}

impl TaskEnvelope {
    pub fn new(task_id: TaskId, task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            fail_count: 0,
        }
    }

    pub fn with_fail_count(mut self, fail_count: u32) -> Self {
        self.fail_count = fail_count;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Failures recorded before this attempt.
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn new_record_is_pending_and_due_immediately() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let record = TaskRecord::new(
            TaskId::new(1),
            TaskType::new("send_message"),
            serde_json::json!({"color": "blue"}),
            now,
        );

        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.fail_count, 0);
        assert_eq!(record.process_at, now);
        assert!(record.completed_at.is_none());
        assert!(record.is_due(now));
        assert!(!record.is_due(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn envelope_carries_id_type_payload_and_failures() {
        let now = Utc::now();
        let mut record = TaskRecord::new(
            TaskId::new(7),
            TaskType::new("t"),
            serde_json::json!({"foo": 123}),
            now,
        );
        record.fail_count = 2;

        let env = record.envelope();
        assert_eq!(env.task_id(), TaskId::new(7));
        assert_eq!(env.task_type().as_str(), "t");
        assert_eq!(env.payload()["foo"], 123);
        assert_eq!(env.fail_count(), 2);
    }
}
