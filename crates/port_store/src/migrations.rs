//! Ordered, exactly-once schema migrations.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::MigrationError;

pub type StepFuture<'c> = Pin<Box<dyn Future<Output = Result<(), sqlx::Error>> + Send + 'c>>;

/// A migration step written in Rust.  Runs on the migration's transaction.
pub type Procedure = for<'c> fn(&'c mut SqliteConnection) -> StepFuture<'c>;

#[derive(Clone, Copy)]
pub enum Step {
    /// A single SQL statement.
    Sql(&'static str),
    Procedure(Procedure),
}

#[derive(Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub steps: &'static [Step],
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of one [`MigrationEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: i64,
    pub to: i64,
    pub applied: Vec<i64>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

impl MigrationEngine {
    /// Sort `migrations` by version and check that versions run 1, 2, 3, ...
    /// with no gaps or duplicates.  Declaration order does not matter.
    pub fn new(migrations: &[Migration]) -> Result<Self, MigrationError> {
        let mut migrations = migrations.to_vec();
        migrations.sort_by_key(|m| m.version);

        for (idx, m) in migrations.iter().enumerate() {
            let expected = idx as i64 + 1;
            if m.version != expected {
                let reason = if idx > 0 && m.version == migrations[idx - 1].version {
                    format!("duplicate version {}", m.version)
                } else {
                    format!("expected version {expected}, found {}", m.version)
                };
                return Err(MigrationError::InvalidSequence(reason));
            }
        }
        Ok(Self { migrations })
    }

    /// Highest known version, 0 for an empty list.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Apply every migration newer than the store's version, in order.
    /// Stops at the first failure; earlier migrations stay committed.
    pub async fn run(&self, pool: &SqlitePool) -> Result<MigrationReport, MigrationError> {
        ensure_history_table(pool).await?;

        let from = current_version(pool).await?;
        let latest = self.latest_version();
        if from > latest {
            return Err(MigrationError::StoreAhead {
                found: from,
                latest,
            });
        }

        let mut applied = Vec::new();
        for migration in self.migrations.iter().filter(|m| m.version > from) {
            apply_one(pool, migration).await?;
            info!(
                version = migration.version,
                description = migration.description,
                "migration applied"
            );
            applied.push(migration.version);
        }

        let to = applied.last().copied().unwrap_or(from);
        if applied.is_empty() {
            debug!(version = from, "schema already current");
        }
        Ok(MigrationReport { from, to, applied })
    }

    /// Migration history, oldest first.
    pub async fn applied(pool: &SqlitePool) -> Result<Vec<AppliedMigration>, MigrationError> {
        ensure_history_table(pool).await?;
        let rows = sqlx::query_as::<_, AppliedMigration>(
            "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

/// Current schema version, 0 for a fresh store.
pub async fn current_version(pool: &SqlitePool) -> Result<i64, MigrationError> {
    ensure_history_table(pool).await?;
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

async fn ensure_history_table(pool: &SqlitePool) -> Result<(), MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Steps and the history row share one transaction; dropping it on error
/// rolls everything back.
async fn apply_one(pool: &SqlitePool, migration: &Migration) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::StepFailed {
        version: migration.version,
        description: migration.description,
        source,
    };

    let mut tx = pool.begin().await.map_err(failed)?;
    for step in migration.steps {
        match step {
            Step::Sql(sql) => {
                sqlx::query(*sql).execute(&mut *tx).await.map_err(failed)?;
            }
            Step::Procedure(procedure) => {
                procedure(&mut *tx).await.map_err(failed)?;
            }
        }
    }

    sqlx::query("INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.description)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

    tx.commit().await.map_err(failed)
}
