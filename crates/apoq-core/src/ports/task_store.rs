//! TaskStore port - タスクの正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクの永続化（insert / get）
//! - claim（pending かつ実行時刻を過ぎた行を 1 件だけ確保）
//! - claim 後の状態更新（completed / retry / failed）
//!
//! # 実装
//! - `impls::InMemoryTaskStore`: テスト・開発用
//! - `impls::PgTaskStore`: PostgreSQL（`FOR UPDATE SKIP LOCKED`）

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ClaimId, StoreError, TaskId, TaskRecord, TaskType};
use crate::observability::QueueCounts;

/// claim がこれより古ければ放棄されたとみなす（store 側の既定値）
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// TaskStore は状態の正本
///
/// # Claim の契約
/// - `claim_next` は `state = pending`、`task_type ∈ types`、`process_at <= now`、
///   未 claim（または claim が期限切れ）の行から `process_at` 昇順（同値は id 昇順）で
///   1 件だけ選び、`claim_id` を刻んで返す。選択と刻印はアトミック。
/// - 他者が処理中の行は待たずにスキップする（ブロックしない）。
/// - 候補がなければ `Ok(None)`。エラーではない。
/// - claim の期限は `set_claim_timeout` で変えられる（既定は [`DEFAULT_CLAIM_TIMEOUT`]）。
///   `None` なら claim は terminal write でしか外れない。
///
/// # 状態更新の契約
/// - `mark_*` は「まだ pending で、同じ `claim_id` が刻まれている」行にだけ適用され、
///   刻印を消す。条件を満たさなければ `StoreError::ClaimLost`。
/// - terminal な行が pending に戻ることはない。
/// - `fail_count` は減らない。`process_at` は前にしか動かない。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Idempotent schema bootstrap; must be safe to call concurrently from
    /// several processes.
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Replace the age after which a claim counts as abandoned. Called by
    /// `TaskQueueBuilder::build` with `QueueConfig::claim_timeout`; stores
    /// without leases may ignore it.
    fn set_claim_timeout(&self, _timeout: Option<Duration>) {}

    /// Insert a new pending task eligible immediately.
    async fn insert(
        &self,
        task_type: &TaskType,
        data: serde_json::Value,
    ) -> Result<TaskId, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Claim the oldest eligible task among `types`.
    async fn claim_next(
        &self,
        types: &[TaskType],
        claim_id: ClaimId,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Pending -> Completed. Sets `completed_at`.
    async fn mark_completed(&self, id: TaskId, claim_id: ClaimId)
    -> Result<TaskRecord, StoreError>;

    /// Pending -> Failed with the new failure count.
    async fn mark_failed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
    ) -> Result<TaskRecord, StoreError>;

    /// Pending -> Pending with the new failure count, eligible again at
    /// `process_at`.
    async fn mark_retrying(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
        process_at: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError>;

    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError>;
}
