//! テスト用: 指定した操作を失敗させる TaskStore
//!
//! 中身は `InMemoryTaskStore`。DB が落ちた時の executor / worker loop の
//! 振る舞いを確かめるのに使う。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::InMemoryTaskStore;
use crate::domain::{ClaimId, StoreError, TaskId, TaskRecord, TaskType};
use crate::observability::QueueCounts;
use crate::ports::TaskStore;

pub struct FlakyTaskStore {
    inner: InMemoryTaskStore,
    claim_failures: AtomicUsize,
    failed_claims: AtomicUsize,
    fail_completions: AtomicBool,
}

impl FlakyTaskStore {
    pub fn new(inner: InMemoryTaskStore) -> Self {
        Self {
            inner,
            claim_failures: AtomicUsize::new(0),
            failed_claims: AtomicUsize::new(0),
            fail_completions: AtomicBool::new(false),
        }
    }

    /// The next `n` calls to `claim_next` fail.
    pub fn fail_next_claims(self, n: usize) -> Self {
        self.claim_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every `mark_completed` fails.
    pub fn fail_completions(self) -> Self {
        self.fail_completions.store(true, Ordering::SeqCst);
        self
    }

    /// How many `claim_next` calls were turned into errors.
    pub fn failed_claims(&self) -> usize {
        self.failed_claims.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    fn set_claim_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_claim_timeout(timeout);
    }

    async fn insert(
        &self,
        task_type: &TaskType,
        data: serde_json::Value,
    ) -> Result<TaskId, StoreError> {
        self.inner.insert(task_type, data).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn claim_next(
        &self,
        types: &[TaskType],
        claim_id: ClaimId,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let failing = self
            .claim_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.failed_claims.fetch_add(1, Ordering::SeqCst);
            return Err(Self::unavailable());
        }
        self.inner.claim_next(types, claim_id).await
    }

    async fn mark_completed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
    ) -> Result<TaskRecord, StoreError> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.mark_completed(id, claim_id).await
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.mark_failed(id, claim_id, fail_count).await
    }

    async fn mark_retrying(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
        process_at: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        self.inner
            .mark_retrying(id, claim_id, fail_count, process_at)
            .await
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError> {
        self.inner.counts_by_state().await
    }
}
