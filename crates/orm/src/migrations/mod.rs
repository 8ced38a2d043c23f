//! Migration System
//!
//! Changeset discovery, the migration ledger and the runner that applies and
//! reverts changesets in batches.

pub mod definitions;
pub mod document;
pub mod ledger;
pub mod manager;
pub mod rollback;
pub mod runner;

pub use definitions::*;
pub use document::{AlterSpec, AlterStep, ChangesetDocument, ColumnSpec, DefaultSpec, ForeignKeySpec, IndexSpec, SchemaOperation, TableSpec};
pub use ledger::{latest_batch, MigrationLedger};
pub use manager::MigrationManager;
pub use runner::Migrator;
