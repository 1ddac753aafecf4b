use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration list: {0}")]
    InvalidSequence(String),

    #[error("Store schema version {found} is newer than the latest known migration {latest}")]
    StoreAhead { found: i64, latest: i64 },

    #[error("Migration {version} ({description}) failed: {source}")]
    StepFailed {
        version: i64,
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration history error: {0}")]
    Bookkeeping(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}
