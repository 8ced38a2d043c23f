//! Error types for the schema and migration system
//!
//! Every failure surfaced by the DDL builder, the introspector or the runner is
//! one of the variants below. Errors are never retried automatically.

use thiserror::Error;

use crate::migrations::MigrationDirection;

/// Result type alias for schema and migration operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for schema operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrmError {
    /// Malformed descriptor: bad identifier, invalid size or precision, unknown type
    #[error("Validation error: {0}")]
    Validation(String),

    /// Create against an existing table or column, or alter of a missing column
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Alter, drop or introspection of a table that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The database rejected a statement
    #[error("Execution error: {0}")]
    Execution(String),

    /// Unreachable connection or missing permissions on the ledger
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OrmError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        OrmError::Validation(message.into())
    }

    /// Create a schema conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        OrmError::SchemaConflict(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        OrmError::NotFound(message.into())
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        OrmError::Execution(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        OrmError::Configuration(message.into())
    }

    /// Whether this error was raised before touching the database
    pub fn is_validation(&self) -> bool {
        matches!(self, OrmError::Validation(_))
    }
}

// Driver failures are always statement execution failures; connection problems
// are classified by the backend before reaching this conversion.
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        OrmError::Execution(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrmError {
    fn from(err: serde_yaml::Error) -> Self {
        OrmError::Validation(format!("Invalid changeset document: {}", err))
    }
}

impl From<keel_core::ConfigError> for OrmError {
    fn from(err: keel_core::ConfigError) -> Self {
        OrmError::Configuration(err.to_string())
    }
}

/// Result type alias for migrator operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors raised by the migrator
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Orm(#[from] OrmError),

    /// A changeset failed; its transaction was rolled back and the ledger is unchanged
    #[error("Changeset {version} failed while migrating {direction}: {source}")]
    ChangesetFailed {
        version: String,
        direction: MigrationDirection,
        #[source]
        source: OrmError,
    },

    /// The ledger names a version no changeset source provides
    #[error("Changeset {0} is recorded as applied but its source cannot be found")]
    MissingChangeset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// The underlying schema error, if any
    pub fn orm_error(&self) -> Option<&OrmError> {
        match self {
            MigrationError::Orm(err) | MigrationError::ChangesetFailed { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::ChangesetFailed {
            version: "20240101000000_create_users".to_string(),
            direction: MigrationDirection::Up,
            source: OrmError::execution("relation exists"),
        };
        assert_eq!(
            err.to_string(),
            "Changeset 20240101000000_create_users failed while migrating up: Execution error: relation exists"
        );
        assert_eq!(err.orm_error(), Some(&OrmError::execution("relation exists")));

        let err = MigrationError::from(OrmError::validation("bad name"));
        assert_eq!(err.to_string(), "Validation error: bad name");
        assert!(MigrationError::MissingChangeset("x".to_string()).orm_error().is_none());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            OrmError::validation("bad identifier").to_string(),
            "Validation error: bad identifier"
        );
        assert_eq!(
            OrmError::not_found("table 'users'").to_string(),
            "Not found: table 'users'"
        );
        assert!(OrmError::validation("x").is_validation());
        assert!(!OrmError::execution("x").is_validation());
    }
}
