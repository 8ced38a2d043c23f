//! Migration Manager - File system operations for changesets
//!
//! Discovers `.sql` and `.yaml`/`.yml` changesets in the migrations directory,
//! merges them with changesets registered in code, and writes new changeset
//! files from templates.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{MigrationResult, OrmError, OrmResult};
use crate::schema::{validate_identifier, DdlCompiler};
use super::definitions::{
    format_version, validate_version, version_timestamp, Changeset, ChangesetSource, ChangesetStep, ChangesetTemplate,
    MigrationConfig,
};
use super::document::ChangesetDocument;

static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^--\s*(up|down)(\s+migration)?\s*:?\s*$").expect("section marker pattern is valid")
});

/// Section of a SQL changeset file
#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Changeset manager for creating and loading changesets
pub struct MigrationManager {
    config: MigrationConfig,
    registered: Vec<Changeset>,
}

impl MigrationManager {
    /// Create a new manager with default configuration
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::default())
    }

    /// Create a new manager with custom configuration
    pub fn with_config(config: MigrationConfig) -> Self {
        Self {
            config,
            registered: Vec::new(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Add a changeset defined in code
    pub fn register(&mut self, changeset: Changeset) {
        self.registered.push(changeset);
    }

    /// All known changesets in version order
    ///
    /// Two changesets sharing a timestamp are rejected, even under different
    /// names, since their relative order would then depend on the name.
    pub fn discover(&self) -> MigrationResult<Vec<Changeset>> {
        let mut changesets = self.load_files()?;
        changesets.extend(self.registered.iter().cloned());
        changesets.sort_by(|a, b| a.version.cmp(&b.version));

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for changeset in &changesets {
            let timestamp = version_timestamp(&changeset.version);
            if let Some(previous) = seen.insert(timestamp, changeset.version.as_str()) {
                let message = if previous == changeset.version {
                    format!("Changeset version '{}' is defined more than once", changeset.version)
                } else {
                    format!(
                        "Changesets '{}' and '{}' share the timestamp {}",
                        previous, changeset.version, timestamp
                    )
                };
                return Err(OrmError::validation(message).into());
            }
        }

        Ok(changesets)
    }

    /// Load every changeset file from the migrations directory
    pub fn load_files(&self) -> MigrationResult<Vec<Changeset>> {
        let dir = &self.config.migrations_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut changesets = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(changeset) = self.load_file(&path)? {
                changesets.push(changeset);
            }
        }
        Ok(changesets)
    }

    /// Parse one changeset file; other files are ignored
    pub fn load_file(&self, path: &Path) -> MigrationResult<Option<Changeset>> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !path.is_file() || !matches!(extension, "sql" | "yaml" | "yml") {
            return Ok(None);
        }

        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| OrmError::validation(format!("Invalid changeset filename {}", path.display())))?
            .to_string();
        validate_version(&version)?;

        let content = fs::read_to_string(path)?;
        let (up, down) = if extension == "sql" {
            let (up_sql, down_sql) = self.parse_sql_content(&content).map_err(|e| match e {
                OrmError::Validation(message) => OrmError::validation(format!("{}: {}", path.display(), message)),
                other => other,
            })?;
            (
                ChangesetStep::Statements(self.split_sql_statements(&up_sql)),
                ChangesetStep::Statements(self.split_sql_statements(&down_sql)),
            )
        } else {
            let document = ChangesetDocument::from_yaml(&content).map_err(|e| {
                OrmError::validation(format!("{}: {}", path.display(), e))
            })?;
            document.validate(&DdlCompiler::new(self.config.schema.as_str()))?;
            (
                ChangesetStep::Operations(document.up),
                ChangesetStep::Operations(document.down),
            )
        };

        let changeset = Changeset::new(version, up, down)?.with_source(ChangesetSource::File(path.to_path_buf()));
        Ok(Some(changeset))
    }

    /// Split SQL file content into its up and down sections
    ///
    /// Only comments may precede the first section marker, and a file with
    /// any content must have an up section.
    pub fn parse_sql_content(&self, content: &str) -> OrmResult<(String, String)> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Preamble;
        let mut has_up = false;

        for (number, line) in content.lines().enumerate() {
            if let Some(captures) = SECTION_MARKER.captures(line.trim()) {
                section = if captures[1].eq_ignore_ascii_case("up") {
                    has_up = true;
                    Section::Up
                } else {
                    Section::Down
                };
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::Preamble => {
                    return Err(OrmError::validation(format!(
                        "line {}: SQL before the '-- Up migration' marker",
                        number + 1
                    )));
                }
            }
        }

        if !has_up && !content.trim().is_empty() {
            return Err(OrmError::validation("missing '-- Up migration' section"));
        }

        Ok((up.join("\n").trim().to_string(), down.join("\n").trim().to_string()))
    }

    /// Split SQL into individual statements
    pub fn split_sql_statements(&self, sql: &str) -> Vec<String> {
        if sql.trim().is_empty() {
            return Vec::new();
        }

        match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => statements.iter().map(|statement| statement.to_string()).collect(),
            Err(e) => {
                // Dialect gaps (procedural bodies, exotic DDL) still run, split naively
                tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
                sql.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        }
    }

    /// Write a new changeset file stamped with the current time
    pub fn create_changeset(&self, name: &str, template: &ChangesetTemplate) -> MigrationResult<String> {
        self.create_changeset_at(name, template, Utc::now())
    }

    /// Write a new changeset file stamped with `timestamp`; returns its filename
    pub fn create_changeset_at(
        &self,
        name: &str,
        template: &ChangesetTemplate,
        timestamp: DateTime<Utc>,
    ) -> MigrationResult<String> {
        let version = format_version(timestamp, name)?;
        let content = self.render_template(&version, template, timestamp)?;

        let timestamp_taken = self
            .discover()?
            .iter()
            .find(|c| version_timestamp(&c.version) == version_timestamp(&version))
            .map(|c| c.version.clone());
        if let Some(existing) = timestamp_taken {
            return Err(OrmError::validation(format!(
                "Changeset '{}' already uses the timestamp of '{}'",
                existing, version
            ))
            .into());
        }

        fs::create_dir_all(&self.config.migrations_dir)?;
        let filename = format!("{}.{}", version, template_extension(template));
        let path: PathBuf = self.config.migrations_dir.join(&filename);
        fs::write(&path, content)?;

        tracing::info!("Created changeset {}", path.display());
        Ok(filename)
    }

    fn render_template(
        &self,
        version: &str,
        template: &ChangesetTemplate,
        timestamp: DateTime<Utc>,
    ) -> MigrationResult<String> {
        let created = timestamp.format("%Y-%m-%d %H:%M:%S UTC");

        let content = match template {
            ChangesetTemplate::Sql => format!(
                "-- Changeset: {}\n\
                 -- Created: {}\n\n\
                 -- Up migration\n\n\n\
                 -- Down migration\n\n",
                version, created
            ),
            ChangesetTemplate::CreateTable { table } => {
                validate_identifier(table)?;
                format!(
                    "# Changeset: {version}\n\
                     # Created: {created}\n\
                     up:\n  \
                       - op: create_table\n    \
                         table: {table}\n    \
                         columns:\n      \
                           - {{ name: id, type: bigserial, primary: true }}\n      \
                           - {{ name: created_at, type: timestamptz, nullable: false, default_raw: CURRENT_TIMESTAMP }}\n      \
                           - {{ name: updated_at, type: timestamptz, nullable: false, default_raw: CURRENT_TIMESTAMP }}\n\
                     down:\n  \
                       - op: drop_table\n    \
                         table: {table}\n"
                )
            }
            ChangesetTemplate::AlterTable { table } => {
                validate_identifier(table)?;
                format!(
                    "# Changeset: {version}\n\
                     # Created: {created}\n\
                     up:\n  \
                       - op: alter_table\n    \
                         table: {table}\n    \
                         steps: []\n\
                     down:\n  \
                       - op: alter_table\n    \
                         table: {table}\n    \
                         steps: []\n"
                )
            }
        };
        Ok(content)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

fn template_extension(template: &ChangesetTemplate) -> &'static str {
    match template {
        ChangesetTemplate::Sql => "sql",
        ChangesetTemplate::CreateTable { .. } | ChangesetTemplate::AlterTable { .. } => "yaml",
    }
}
