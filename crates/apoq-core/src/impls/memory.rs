//! In-memory task store.
//!
//! Same claim semantics as the PostgreSQL store, minus durability: a single
//! `tokio::sync::Mutex` makes select-and-stamp atomic, which is what
//! `FOR UPDATE SKIP LOCKED` gives the database version.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{ClaimId, StoreError, TaskId, TaskRecord, TaskState, TaskType};
use crate::observability::QueueCounts;
use crate::ports::{Clock, DEFAULT_CLAIM_TIMEOUT, SystemClock, TaskStore};

struct Entry {
    record: TaskRecord,
    /// Live claim stamp and when it was taken.
    claim: Option<(ClaimId, DateTime<Utc>)>,
}

struct InMemoryState {
    /// All task records, keyed (and therefore ordered) by id.
    entries: BTreeMap<TaskId, Entry>,

    /// Next task ID to assign.
    next_id: i64,
}

/// In-memory `TaskStore`, for tests and local runs without a database.
pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
    claim_timeout: RwLock<Option<chrono::Duration>>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                entries: BTreeMap::new(),
                next_id: 1,
            }),
            clock,
            claim_timeout: RwLock::new(to_chrono(Some(DEFAULT_CLAIM_TIMEOUT))),
        }
    }

    /// Treat claims older than `timeout` as abandoned. `None` means a claim is
    /// only released by a terminal write.
    pub fn with_claim_timeout(self, timeout: Option<Duration>) -> Self {
        self.set_claim_timeout(timeout);
        self
    }

    fn claim_timeout(&self) -> Option<chrono::Duration> {
        *self
            .claim_timeout
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the failure count of a task (for testing)
    #[cfg(test)]
    pub async fn set_fail_count(&self, id: TaskId, fail_count: u32) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.record.fail_count = fail_count;
        }
    }

    /// Whether a claim stamp is present (for testing)
    #[cfg(test)]
    pub async fn is_claimed(&self, id: TaskId) -> bool {
        let state = self.state.lock().await;
        state.entries.get(&id).is_some_and(|e| e.claim.is_some())
    }

    /// Apply `f` to a pending task still holding `claim_id`, then drop the claim.
    async fn finish<F>(&self, id: TaskId, claim_id: ClaimId, f: F) -> Result<TaskRecord, StoreError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), StoreError> + Send,
    {
        let mut state = self.state.lock().await;
        let entry = state.entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let holds_claim = matches!(entry.claim, Some((held, _)) if held == claim_id);
        if entry.record.state != TaskState::Pending || !holds_claim {
            return Err(StoreError::ClaimLost(id));
        }

        f(&mut entry.record)?;
        entry.claim = None;
        Ok(entry.record.clone())
    }
}

fn to_chrono(timeout: Option<Duration>) -> Option<chrono::Duration> {
    timeout.map(|t| chrono::Duration::from_std(t).unwrap_or(chrono::Duration::MAX))
}

fn claim_is_live(
    timeout: Option<chrono::Duration>,
    claimed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match timeout {
        Some(timeout) => claimed_at
            .checked_add_signed(timeout)
            .is_none_or(|expires| expires > now),
        None => true,
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn set_claim_timeout(&self, timeout: Option<Duration>) {
        *self
            .claim_timeout
            .write()
            .unwrap_or_else(PoisonError::into_inner) = to_chrono(timeout);
    }

    async fn insert(
        &self,
        task_type: &TaskType,
        data: serde_json::Value,
    ) -> Result<TaskId, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = TaskId::new(state.next_id);
        state.next_id += 1;
        state.entries.insert(
            id,
            Entry {
                record: TaskRecord::new(id, task_type.clone(), data, now),
                claim: None,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.get(&id).map(|e| e.record.clone()))
    }

    async fn claim_next(
        &self,
        types: &[TaskType],
        claim_id: ClaimId,
    ) -> Result<Option<TaskRecord>, StoreError> {
        if types.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let timeout = self.claim_timeout();
        let mut state = self.state.lock().await;

        // BTreeMap は id 昇順なので、process_at が同値なら先に見つかった方が勝つ
        let chosen = state
            .entries
            .values()
            .filter(|e| e.record.is_due(now))
            .filter(|e| types.contains(&e.record.task_type))
            .filter(|e| !matches!(e.claim, Some((_, at)) if claim_is_live(timeout, at, now)))
            .min_by_key(|e| (e.record.process_at, e.record.id))
            .map(|e| e.record.id);

        let Some(id) = chosen else {
            return Ok(None);
        };
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("{id} vanished during claim")))?;
        entry.claim = Some((claim_id, now));
        Ok(Some(entry.record.clone()))
    }

    async fn mark_completed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        self.finish(id, claim_id, |record| {
            record.state = TaskState::Completed;
            record.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
    ) -> Result<TaskRecord, StoreError> {
        self.finish(id, claim_id, |record| {
            if fail_count < record.fail_count {
                return Err(StoreError::ClaimLost(id));
            }
            record.state = TaskState::Failed;
            record.fail_count = fail_count;
            Ok(())
        })
        .await
    }

    async fn mark_retrying(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
        process_at: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        self.finish(id, claim_id, |record| {
            if fail_count < record.fail_count {
                return Err(StoreError::ClaimLost(id));
            }
            record.fail_count = fail_count;
            record.process_at = record.process_at.max(process_at);
            Ok(())
        })
        .await
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError> {
        let now = self.clock.now();
        let timeout = self.claim_timeout();
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.entries.values() {
            match entry.record.state {
                TaskState::Pending => {
                    counts.pending += 1;
                    if matches!(entry.claim, Some((_, at)) if claim_is_live(timeout, at, now)) {
                        counts.claimed += 1;
                    }
                }
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
