//! Migration Definitions - Core types for changesets and the ledger
//!
//! A changeset is a versioned pair of up/down steps. Versions are
//! `<YYYYMMDDHHMMSS>_<name>` so lexical order is chronological order.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use keel_core::MigrationSettings;

use crate::backends::DatabaseTransaction;
use crate::error::{OrmError, OrmResult};
use crate::schema::SchemaBuilder;
use super::document::SchemaOperation;

/// chrono format of the version prefix
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const VERSION_TIMESTAMP_DIGITS: usize = 14;

static VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{14})_([a-z0-9]+(?:_[a-z0-9]+)*)$").expect("version pattern is valid")
});

/// Lowercase `name`, map anything outside `[a-z0-9_]` to `_`, collapse and trim underscores
pub fn normalize_name(name: &str) -> OrmResult<String> {
    let mut normalized = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' };
        if c == '_' && normalized.ends_with('_') {
            continue;
        }
        normalized.push(c);
    }

    let normalized = normalized.trim_matches('_').to_string();
    if normalized.is_empty() {
        return Err(OrmError::validation(format!(
            "Changeset name '{}' has no usable characters",
            name
        )));
    }
    Ok(normalized)
}

/// Build a version from a timestamp and a human name
pub fn format_version(timestamp: DateTime<Utc>, name: &str) -> OrmResult<String> {
    Ok(format!(
        "{}_{}",
        timestamp.format(VERSION_TIMESTAMP_FORMAT),
        normalize_name(name)?
    ))
}

/// Check that `version` is a timestamp prefix plus a normalized name
pub fn validate_version(version: &str) -> OrmResult<()> {
    let captures = VERSION.captures(version).ok_or_else(|| {
        OrmError::validation(format!(
            "Changeset version '{}' must look like YYYYMMDDHHMMSS_name",
            version
        ))
    })?;
    NaiveDateTime::parse_from_str(&captures[1], VERSION_TIMESTAMP_FORMAT).map_err(|e| {
        OrmError::validation(format!("Changeset version '{}' has an invalid timestamp: {}", version, e))
    })?;
    Ok(())
}

/// The 14-digit timestamp that orders a validated version
pub fn version_timestamp(version: &str) -> &str {
    version.get(..VERSION_TIMESTAMP_DIGITS).unwrap_or(version)
}

/// Boxed future returned by a code-defined step
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = OrmResult<()>> + Send + 'a>>;

/// Code-defined step; receives a builder bound to the changeset's transaction
pub type StepFn = Arc<dyn for<'a> Fn(SchemaBuilder<'a>) -> StepFuture<'a> + Send + Sync>;

/// One direction of a changeset
#[derive(Clone)]
pub enum ChangesetStep {
    /// Raw SQL, executed in order
    Statements(Vec<String>),
    /// Declarative operations from a YAML changeset
    Operations(Vec<SchemaOperation>),
    /// Rust code driving the schema builder
    Function(StepFn),
}

impl ChangesetStep {
    pub fn is_empty(&self) -> bool {
        match self {
            ChangesetStep::Statements(statements) => statements.is_empty(),
            ChangesetStep::Operations(operations) => operations.is_empty(),
            ChangesetStep::Function(_) => false,
        }
    }

    /// Run the step inside `tx` against tables in `schema`
    pub(crate) async fn run(&self, tx: &mut dyn DatabaseTransaction, schema: &str) -> OrmResult<()> {
        let mut builder = SchemaBuilder::new(tx, schema);
        match self {
            ChangesetStep::Statements(statements) => {
                for statement in statements {
                    builder.raw(statement, &[]).await?;
                }
                Ok(())
            }
            ChangesetStep::Operations(operations) => {
                for operation in operations {
                    operation.apply(&mut builder).await?;
                }
                Ok(())
            }
            ChangesetStep::Function(step) => step(builder).await,
        }
    }
}

impl fmt::Debug for ChangesetStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangesetStep::Statements(statements) => f.debug_tuple("Statements").field(statements).finish(),
            ChangesetStep::Operations(operations) => f.debug_tuple("Operations").field(operations).finish(),
            ChangesetStep::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Where a changeset was discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetSource {
    /// Registered in code
    Registered,
    /// Loaded from a file in the migrations directory
    File(PathBuf),
}

/// A versioned, reversible schema change
#[derive(Debug, Clone)]
pub struct Changeset {
    pub version: String,
    pub up: ChangesetStep,
    pub down: ChangesetStep,
    pub source: ChangesetSource,
}

impl Changeset {
    /// Changeset registered in code
    pub fn new(version: impl Into<String>, up: ChangesetStep, down: ChangesetStep) -> OrmResult<Self> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self {
            version,
            up,
            down,
            source: ChangesetSource::Registered,
        })
    }

    /// Changeset made of raw SQL statements
    pub fn sql(version: impl Into<String>, up: &[&str], down: &[&str]) -> OrmResult<Self> {
        let owned = |statements: &[&str]| statements.iter().map(|s| s.to_string()).collect();
        Self::new(
            version,
            ChangesetStep::Statements(owned(up)),
            ChangesetStep::Statements(owned(down)),
        )
    }

    /// Changeset whose steps are async Rust functions
    pub fn from_fn<U, D>(version: impl Into<String>, up: U, down: D) -> OrmResult<Self>
    where
        U: for<'a> Fn(SchemaBuilder<'a>) -> StepFuture<'a> + Send + Sync + 'static,
        D: for<'a> Fn(SchemaBuilder<'a>) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Self::new(
            version,
            ChangesetStep::Function(Arc::new(up)),
            ChangesetStep::Function(Arc::new(down)),
        )
    }

    pub(crate) fn with_source(mut self, source: ChangesetSource) -> Self {
        self.source = source;
        self
    }

    /// Name part of the version
    pub fn name(&self) -> &str {
        self.version.split_once('_').map_or(self.version.as_str(), |(_, name)| name)
    }

    /// The step for `direction`
    pub fn step(&self, direction: MigrationDirection) -> &ChangesetStep {
        match direction {
            MigrationDirection::Up => &self.up,
            MigrationDirection::Down => &self.down,
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    /// Apply the changeset
    Up,
    /// Revert the changeset
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => f.write_str("up"),
            MigrationDirection::Down => f.write_str("down"),
        }
    }
}

/// One applied changeset as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    pub version: String,
    pub batch: i32,
}

/// Result of `up`
#[derive(Debug, Clone, Serialize)]
pub struct UpResult {
    /// Batch the changesets were recorded under; `None` when nothing was pending
    pub batch: Option<i32>,
    /// Versions applied, in order
    pub applied: Vec<String>,
    /// Number of changesets that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of `down` and `reset`
#[derive(Debug, Clone, Serialize)]
pub struct DownResult {
    /// Versions reverted, in the order they were reverted
    pub rolled_back: Vec<String>,
    /// Batches that were unwound
    pub batches: Vec<i32>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Applied versus pending changesets
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Ledger entries with a known changeset, in version order
    pub applied: Vec<LedgerRecord>,
    /// Known changesets not yet applied, in version order
    pub pending: Vec<String>,
    /// Ledger entries whose changeset can no longer be found
    pub orphaned: Vec<LedgerRecord>,
}

impl StatusReport {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Template used by `create_changeset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetTemplate {
    /// SQL file with empty up and down sections
    Sql,
    /// YAML changeset creating `table` and dropping it on the way down
    CreateTable { table: String },
    /// YAML changeset altering `table`
    AlterTable { table: String },
}

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory where changeset files are stored
    pub migrations_dir: PathBuf,
    /// Schema namespace changesets and the ledger live in
    pub schema: String,
    /// Table name for tracking applied changesets
    pub ledger_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::from_settings(&MigrationSettings::default())
    }
}

impl MigrationConfig {
    pub fn from_settings(settings: &MigrationSettings) -> Self {
        Self {
            migrations_dir: settings.migrations_dir.clone(),
            schema: settings.schema.clone(),
            ledger_table: settings.ledger_table.clone(),
        }
    }
}

impl From<MigrationSettings> for MigrationConfig {
    fn from(settings: MigrationSettings) -> Self {
        Self::from_settings(&settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Create Users Table").unwrap(), "create_users_table");
        assert_eq!(normalize_name("  add--email!! index ").unwrap(), "add_email_index");
        assert_eq!(normalize_name("__v2__").unwrap(), "v2");
        assert!(normalize_name("!!!").unwrap_err().is_validation());
        assert!(normalize_name("").is_err());
    }

    #[test]
    fn test_versions() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let version = format_version(at, "Create users").unwrap();
        assert_eq!(version, "20240309140500_create_users");
        assert!(validate_version(&version).is_ok());

        assert!(validate_version("20240309_create_users").is_err());
        assert!(validate_version("20241399000000_bad_month").is_err());
        assert!(validate_version("20240309140500_Create").is_err());
        assert!(validate_version("20240309140500_").is_err());
    }

    #[test]
    fn test_changeset_accessors() {
        let changeset = Changeset::sql(
            "20240101000000_create_users",
            &["CREATE TABLE users (id SERIAL PRIMARY KEY)"],
            &["DROP TABLE users"],
        )
        .unwrap();

        assert_eq!(changeset.name(), "create_users");
        assert_eq!(changeset.source, ChangesetSource::Registered);
        assert!(!changeset.step(MigrationDirection::Up).is_empty());
        assert!(format!("{:?}", changeset.up).starts_with("Statements"));
        assert!(Changeset::sql("create_users", &[], &[]).is_err());
    }

    #[test]
    fn test_function_step_debug() {
        let changeset = Changeset::from_fn(
            "20240101000000_noop",
            |_schema| Box::pin(async { Ok(()) }),
            |_schema| Box::pin(async { Ok(()) }),
        )
        .unwrap();
        assert_eq!(format!("{:?}", changeset.down), "Function(..)");
    }
}
