//! port_store: Local SQLite store for Port
//!
//! # Startup gate
//! The only way to obtain a [`Store`] is through `Store::open*`, which runs
//! every pending migration before returning.  Nothing else can touch the
//! database until the schema is current.
//!
//! # Migration
//! Migrations are statically defined in [`catalog`] and applied by
//! [`MigrationEngine`], one transaction per migration.  The history table
//! `schema_migrations` records every applied version.

pub mod catalog;
pub mod db;
pub mod error;
pub mod migrations;
pub mod models;

pub use db::Store;
pub use error::{MigrationError, StoreError};
pub use migrations::{AppliedMigration, Migration, MigrationEngine, MigrationReport, Step};
