//! PostgreSQL-backed task store.
//!
//! ## Claim
//!
//! `claim_next` is one statement: an `UPDATE … WHERE id = (SELECT … FOR UPDATE
//! SKIP LOCKED)` that stamps `locked_at` / `locked_by`. The row lock lives only
//! for that statement; the stamp is what hides the task from other claimants
//! while its handler runs.
//!
//! ## Terminal writes
//!
//! Every terminal write is guarded by `state = 'pending' AND locked_by = $claim`.
//! Zero affected rows means the claim was lost (expired and re-claimed, or the
//! task is already terminal) and is reported as `StoreError::ClaimLost`.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};

use super::migrate;
use crate::domain::{ClaimId, StoreError, TaskId, TaskRecord, TaskState, TaskType};
use crate::observability::QueueCounts;
use crate::ports::{DEFAULT_CLAIM_TIMEOUT, TaskStore};

const RETURNING: &str =
    "RETURNING id, type, data, state, process_at, completed_at, fail_count, created_at";

/// PostgreSQL `TaskStore`.
///
/// `PgPool` is reference counted, so cloning the store is cheap and every
/// clone shares the same connections and claim timeout.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    claim_timeout: Arc<RwLock<Option<Duration>>>,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_timeout: Arc::new(RwLock::new(Some(DEFAULT_CLAIM_TIMEOUT))),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Treat claims older than `timeout` as abandoned.
    pub fn with_claim_timeout(self, timeout: Option<Duration>) -> Self {
        self.set_claim_timeout(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn claim_timeout_secs(&self) -> Option<f64> {
        self.claim_timeout
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.as_secs_f64())
    }

    async fn finish(
        &self,
        operation: &str,
        id: TaskId,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<TaskRecord, StoreError> {
        let row = query.fetch_optional(&self.pool).await?;
        match row {
            Some(row) => decode(&row),
            None => {
                debug!(task_id = %id, operation, "terminal write matched no row");
                Err(StoreError::ClaimLost(id))
            }
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    fn set_claim_timeout(&self, timeout: Option<Duration>) {
        *self
            .claim_timeout
            .write()
            .unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        migrate::run(&self.pool).await.map(|_| ())
    }

    #[instrument(skip(self, data), err)]
    async fn insert(
        &self,
        task_type: &TaskType,
        data: serde_json::Value,
    ) -> Result<TaskId, StoreError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO apoq_tasks (type, data) VALUES ($1, $2) RETURNING id")
                .bind(task_type.as_str())
                .bind(data)
                .fetch_one(&self.pool)
                .await?;
        Ok(TaskId::new(id))
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, type, data, state, process_at, completed_at, fail_count, created_at
            FROM apoq_tasks
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self, types), err)]
    async fn claim_next(
        &self,
        types: &[TaskType],
        claim_id: ClaimId,
    ) -> Result<Option<TaskRecord>, StoreError> {
        if types.is_empty() {
            return Ok(None);
        }
        let types: Vec<&str> = types.iter().map(TaskType::as_str).collect();

        let sql = format!(
            r#"
            UPDATE apoq_tasks
            SET locked_at = NOW(), locked_by = $2
            WHERE id = (
                SELECT id FROM apoq_tasks
                WHERE state = 'pending'
                  AND type = ANY($1)
                  AND process_at <= NOW()
                  AND (locked_at IS NULL
                       OR ($3::float8 IS NOT NULL AND locked_at < NOW() - make_interval(secs => $3)))
                ORDER BY process_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            {RETURNING}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(types)
            .bind(claim_id.to_string())
            .bind(self.claim_timeout_secs())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn mark_completed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
    ) -> Result<TaskRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE apoq_tasks
            SET state = 'completed', completed_at = NOW(), locked_at = NULL, locked_by = NULL
            WHERE id = $1 AND state = 'pending' AND locked_by = $2
            {RETURNING}
            "#
        );
        let query = sqlx::query(&sql).bind(id.get()).bind(claim_id.to_string());
        self.finish("mark_completed", id, query).await
    }

    #[instrument(skip(self), err)]
    async fn mark_failed(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
    ) -> Result<TaskRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE apoq_tasks
            SET state = 'failed', fail_count = $3, locked_at = NULL, locked_by = NULL
            WHERE id = $1 AND state = 'pending' AND locked_by = $2 AND fail_count <= $3
            {RETURNING}
            "#
        );
        let query = sqlx::query(&sql)
            .bind(id.get())
            .bind(claim_id.to_string())
            .bind(to_db_count(fail_count)?);
        self.finish("mark_failed", id, query).await
    }

    #[instrument(skip(self), err)]
    async fn mark_retrying(
        &self,
        id: TaskId,
        claim_id: ClaimId,
        fail_count: u32,
        process_at: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE apoq_tasks
            SET fail_count = $3, process_at = GREATEST(process_at, $4),
                locked_at = NULL, locked_by = NULL
            WHERE id = $1 AND state = 'pending' AND locked_by = $2 AND fail_count <= $3
            {RETURNING}
            "#
        );
        let query = sqlx::query(&sql)
            .bind(id.get())
            .bind(claim_id.to_string())
            .bind(to_db_count(fail_count)?)
            .bind(process_at);
        self.finish("mark_retrying", id, query).await
    }

    #[instrument(skip(self), err)]
    async fn counts_by_state(&self) -> Result<QueueCounts, StoreError> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT state,
                   COUNT(*),
                   COUNT(*) FILTER (
                       WHERE locked_by IS NOT NULL
                         AND ($1::float8 IS NULL OR locked_at >= NOW() - make_interval(secs => $1))
                   )
            FROM apoq_tasks
            GROUP BY state
            "#,
        )
        .bind(self.claim_timeout_secs())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (state, total, claimed) in rows {
            let total = usize::try_from(total).unwrap_or(0);
            match parse_state(&state)? {
                TaskState::Pending => {
                    counts.pending = total;
                    counts.claimed = usize::try_from(claimed).unwrap_or(0);
                }
                TaskState::Completed => counts.completed = total,
                TaskState::Failed => counts.failed = total,
            }
        }
        Ok(counts)
    }
}

fn decode(row: &PgRow) -> Result<TaskRecord, StoreError> {
    TaskRecord::try_from(TaskRow::from_row(row)?)
}

fn to_db_count(fail_count: u32) -> Result<i32, StoreError> {
    i32::try_from(fail_count)
        .map_err(|_| StoreError::Corrupt(format!("fail_count {fail_count} out of range")))
}

fn parse_state(raw: &str) -> Result<TaskState, StoreError> {
    raw.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))
}

/// Raw `apoq_tasks` row before domain validation.
struct TaskRow {
    id: i64,
    task_type: String,
    data: serde_json::Value,
    state: String,
    process_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    fail_count: i32,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TaskRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TaskRow {
            id: row.try_get("id")?,
            task_type: row.try_get("type")?,
            data: row.try_get("data")?,
            state: row.try_get("state")?,
            process_at: row.try_get("process_at")?,
            completed_at: row.try_get("completed_at")?,
            fail_count: row.try_get("fail_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let fail_count = u32::try_from(row.fail_count).map_err(|_| {
            StoreError::Corrupt(format!("task-{} has negative fail_count {}", row.id, row.fail_count))
        })?;
        Ok(TaskRecord {
            id: TaskId::new(row.id),
            task_type: TaskType::new(row.task_type),
            data: row.data,
            state: parse_state(&row.state)?,
            process_at: row.process_at,
            completed_at: row.completed_at,
            fail_count,
            created_at: row.created_at,
        })
    }
}
