use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::validation::{ConfigError, ConfigValidator, IdentifierValidator, NonEmptyValidator, UrlValidator};

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_LEDGER_TABLE: &str = "keel_migrations";

/// Settings for the migration system
///
/// Every field is optional in configuration files; missing fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSettings {
    /// Directory holding changeset files
    pub migrations_dir: PathBuf,
    /// Schema namespace for changesets and the ledger
    pub schema: String,
    /// Name of the ledger table
    pub ledger_table: String,
    /// Connection string, e.g. `postgres://localhost/app`
    pub database_url: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            schema: DEFAULT_SCHEMA.to_string(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            database_url: None,
        }
    }
}

impl MigrationSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        NonEmptyValidator { field: "migrations_dir" }.validate(&self.migrations_dir.to_string_lossy())?;
        IdentifierValidator::new("schema").validate(&self.schema)?;
        IdentifierValidator::new("ledger_table").validate(&self.ledger_table)?;
        if let Some(url) = &self.database_url {
            UrlValidator::default().validate(url)?;
        }
        Ok(())
    }

    /// The database URL, or an error naming where it can be set
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::validation_failed("database_url is not set (keel.toml or KEEL_DATABASE_URL)")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = MigrationSettings::default();
        assert_eq!(settings.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(settings.schema, "public");
        assert_eq!(settings.ledger_table, "keel_migrations");
        assert!(settings.validate().is_ok());
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn test_invalid_settings() {
        let settings = MigrationSettings {
            schema: "app-data".to_string(),
            ..MigrationSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue { .. })));

        let settings = MigrationSettings {
            migrations_dir: PathBuf::new(),
            ..MigrationSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = MigrationSettings {
            database_url: Some("redis://localhost".to_string()),
            ..MigrationSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_documents_take_defaults() {
        let settings: MigrationSettings = serde_json::from_str(r#"{"schema": "billing"}"#).unwrap();
        assert_eq!(settings.schema, "billing");
        assert_eq!(settings.ledger_table, "keel_migrations");

        assert!(serde_json::from_str::<MigrationSettings>(r#"{"schemas": "billing"}"#).is_err());
    }
}
