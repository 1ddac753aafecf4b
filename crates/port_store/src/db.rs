//! Database abstraction over SQLite via sqlx.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::catalog::MIGRATIONS;
use crate::error::StoreError;
use crate::migrations::{AppliedMigration, Migration, MigrationEngine};
use crate::models::{ConnectionRow, ContactRow};

/// Central store handle.  Cheap to clone (Arc internally).
///
/// Only constructed after the migration engine has brought the schema up to
/// date, so holding a `Store` means the schema is current.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    schema_version: i64,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`.
    /// Runs all pending migrations before returning.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at connection
    /// time here, not inside a migration: SQLite forbids changing
    /// `journal_mode` inside a transaction and every migration runs in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        Self::open_with(db_path, MIGRATIONS).await
    }

    /// Same as [`Store::open`] with an explicit migration list.
    pub async fn open_with(db_path: &Path, migrations: &[Migration]) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(pool, migrations).await
    }

    /// Private in-memory database with the built-in migrations applied.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_in_memory_with(MIGRATIONS).await
    }

    pub async fn open_in_memory_with(migrations: &[Migration]) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true);

        // One connection that never expires, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(opts)
            .await?;
        Self::migrate(pool, migrations).await
    }

    async fn migrate(pool: SqlitePool, migrations: &[Migration]) -> Result<Self, StoreError> {
        let engine = MigrationEngine::new(migrations)?;
        let report = engine.run(&pool).await?;
        if !report.is_noop() {
            info!(from = report.from, to = report.to, "store schema migrated");
        }
        Ok(Self {
            pool,
            schema_version: report.to,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Schema version reached at open.
    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub async fn migration_history(&self) -> Result<Vec<AppliedMigration>, StoreError> {
        Ok(MigrationEngine::applied(&self.pool).await?)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    pub async fn list_connections(&self) -> Result<Vec<ConnectionRow>, StoreError> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            "SELECT chatId, connectionType, name, newMessageCount, folderId, routingId, pairHash
               FROM connections ORDER BY chatId",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_contacts(&self) -> Result<Vec<ContactRow>, StoreError> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT pairHash, name, displayPic, notes, connectedOn, connectionSource
               FROM contacts ORDER BY pairHash",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
