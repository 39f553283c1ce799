//! PostgreSQL schema migrations.
//!
//! Migrations run inside a single transaction holding a transaction-scoped
//! advisory lock, so concurrent `ensure_schema` calls from several processes
//! serialize and every version is applied exactly once.

use sqlx::PgPool;
use tracing::{info, instrument};

use crate::domain::StoreError;

const ADVISORY_LOCK_KEY: i64 = 97_112_111_113;

pub struct Migration {
    pub version: i32,
    /// One statement per entry; each runs as its own prepared query.
    pub up: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        up: &[
            r#"
            CREATE TABLE apoq_tasks (
                id bigserial PRIMARY KEY,
                created_at timestamptz NOT NULL DEFAULT NOW(),
                process_at timestamptz NOT NULL DEFAULT NOW(),
                completed_at timestamptz,
                data jsonb NOT NULL DEFAULT '{}'::jsonb,
                type text NOT NULL,
                state text NOT NULL DEFAULT 'pending'
            )
            "#,
            "CREATE INDEX apoq_tasks_process_at_idx_pending ON apoq_tasks(process_at) WHERE state = 'pending'",
            "CREATE INDEX apoq_tasks_type_idx ON apoq_tasks(type)",
            "CREATE INDEX apoq_tasks_state_idx ON apoq_tasks(state)",
        ],
    },
    Migration {
        version: 2,
        up: &["ALTER TABLE apoq_tasks ADD COLUMN fail_count int NOT NULL DEFAULT 0"],
    },
    Migration {
        version: 3,
        up: &[
            "ALTER TABLE apoq_tasks ADD COLUMN locked_at timestamptz",
            "ALTER TABLE apoq_tasks ADD COLUMN locked_by text",
        ],
    },
];

/// Apply every migration not yet recorded in `apoq_migrations`.
///
/// Returns the versions applied by this call (empty when up to date).
#[instrument(skip(pool), err)]
pub async fn run(pool: &PgPool) -> Result<Vec<i32>, StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ADVISORY_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS apoq_migrations (
            version integer NOT NULL,
            created_at timestamptz NOT NULL DEFAULT NOW(),
            UNIQUE(version)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let done: Vec<i32> = sqlx::query_scalar("SELECT version FROM apoq_migrations")
        .fetch_all(&mut *tx)
        .await?;

    let mut applied = Vec::new();
    for migration in pending(&done) {
        for statement in migration.up {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO apoq_migrations(version) VALUES ($1)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        applied.push(migration.version);
    }
    tx.commit().await?;

    if !applied.is_empty() {
        info!(versions = ?applied, "schema migrated");
    }
    Ok(applied)
}

/// Migrations not in `done`, oldest first.
fn pending(done: &[i32]) -> Vec<&'static Migration> {
    let mut pending: Vec<&'static Migration> = MIGRATIONS
        .iter()
        .filter(|m| !done.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_unique_and_ascending() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(versions.first(), Some(&1));
    }

    #[test]
    fn first_migration_creates_task_table() {
        assert!(MIGRATIONS[0].up[0].contains("CREATE TABLE apoq_tasks"));
    }

    #[test]
    fn pending_skips_applied_versions() {
        let versions: Vec<i32> = pending(&[1, 3]).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2]);
        assert_eq!(pending(&[]).len(), MIGRATIONS.len());
    }

    #[test]
    fn one_statement_per_entry() {
        for migration in MIGRATIONS {
            for statement in migration.up {
                assert!(!statement.trim().trim_end_matches(';').contains(';'));
            }
        }
    }
}
