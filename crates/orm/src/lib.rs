//! # keel-orm: Schema evolution for PostgreSQL
//!
//! A typed DDL builder (column and table descriptors compiled to PostgreSQL
//! DDL), a catalog introspector, and a migrator that applies versioned
//! changesets in batches while recording them in a ledger table.
//!
//! Changesets come from `.sql` and `.yaml` files in the migrations directory
//! or are registered in code. Each one runs in its own transaction together
//! with its ledger write.

pub mod backends;
pub mod error;
pub mod migrations;
pub mod schema;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod schema_tests;


pub use backends::{
    DatabasePool, DatabasePoolConfig, DatabaseRow, DatabaseRowExt, DatabaseTransaction, DatabaseValue,
    PostgresPool,
};
pub use error::*;
pub use migrations::{
    Changeset, ChangesetStep, ChangesetTemplate, DownResult, MigrationConfig, MigrationDirection, Migrator,
    StatusReport, UpResult,
};
pub use schema::*;

pub use keel_core::{ConfigLoader, MigrationSettings};
