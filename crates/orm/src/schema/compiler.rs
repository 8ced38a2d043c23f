//! DDL compiler
//!
//! Turns [`TableBuilder`] blueprints into PostgreSQL statements. Compilation is
//! pure: every validation failure surfaces here, before any statement reaches
//! the database.

use std::collections::HashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{OrmError, OrmResult};
use super::table::{ForeignKeyDefinition, IndexDefinition, TableBuilder, TableCommand, TableIntent};

/// PostgreSQL truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

const GENERATED_NAME_HASH_LENGTH: usize = 8;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Check that `name` is a plain identifier PostgreSQL stores unchanged
pub fn validate_identifier(name: &str) -> OrmResult<()> {
    if name.is_empty() {
        return Err(OrmError::validation("Identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(OrmError::validation(format!(
            "Identifier '{}' exceeds {} bytes",
            name, MAX_IDENTIFIER_LENGTH
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(OrmError::validation(format!("Invalid identifier '{}'", name)));
    }
    Ok(())
}

/// Validate and double-quote an identifier
pub fn quote_identifier(name: &str) -> OrmResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Single-quote a string literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Compiles blueprints for tables living in one schema namespace
#[derive(Debug, Clone)]
pub struct DdlCompiler {
    schema: String,
}

impl DdlCompiler {
    pub fn new(schema: impl Into<String>) -> Self {
        Self { schema: schema.into() }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `"schema"."table"`
    pub fn qualify(&self, table: &str) -> OrmResult<String> {
        Ok(format!("{}.{}", quote_identifier(&self.schema)?, quote_identifier(table)?))
    }

    /// Compile a blueprint according to its intent
    pub fn compile(&self, table: &TableBuilder) -> OrmResult<Vec<String>> {
        match table.intent() {
            TableIntent::Create => self.compile_create(table, false),
            TableIntent::Alter => self.compile_alter(table),
        }
    }

    /// CREATE TABLE plus the index and comment statements that follow it
    pub fn compile_create(&self, table: &TableBuilder, if_not_exists: bool) -> OrmResult<Vec<String>> {
        if table.intent() != TableIntent::Create {
            return Err(OrmError::validation(format!(
                "Blueprint for '{}' is an alteration, not a creation",
                table.name()
            )));
        }

        let qualified = self.qualify(table.name())?;
        let declared = self.declared_columns(table)?;
        let flagged: Vec<String> = table
            .added_columns()
            .filter(|c| c.is_primary())
            .map(|c| c.name().to_string())
            .collect();
        let explicit: Vec<&Vec<String>> = table
            .commands()
            .iter()
            .filter_map(|command| match command {
                TableCommand::AddPrimaryKey(columns) => Some(columns),
                _ => None,
            })
            .collect();

        if explicit.len() > 1 {
            return Err(OrmError::validation(format!(
                "Table '{}' declares more than one primary key",
                table.name()
            )));
        }
        if let Some(columns) = explicit.first() {
            if !flagged.is_empty() && flagged != **columns {
                return Err(OrmError::validation(format!(
                    "Table '{}' flags primary columns that disagree with its composite key",
                    table.name()
                )));
            }
        }

        // A single flagged column keeps its inline PRIMARY KEY; several become one constraint.
        let inline_primary = explicit.is_empty() && flagged.len() == 1;
        let mut definitions = Vec::new();
        let mut trailing = Vec::new();

        for column in table.added_columns() {
            definitions.push(column.render(inline_primary)?);
            if let Some(comment) = column.comment_text() {
                trailing.push(self.column_comment(&qualified, column.name(), comment)?);
            }
        }

        let composite = match explicit.first() {
            Some(columns) => Some((*columns).clone()),
            None if flagged.len() > 1 => Some(flagged.clone()),
            None => None,
        };
        if let Some(columns) = composite {
            require_columns(table.name(), &columns, &declared)?;
            definitions.push(format!("PRIMARY KEY ({})", quote_list(&columns)?));
        }

        for command in table.commands() {
            match command {
                TableCommand::AddColumn(_) | TableCommand::AddPrimaryKey(_) => {}
                TableCommand::AddUnique(columns) => {
                    require_columns(table.name(), columns, &declared)?;
                    definitions.push(self.unique_constraint(table.name(), columns)?);
                }
                TableCommand::AddForeignKey(index) => {
                    let fk = lookup(table.foreign_keys(), *index)?;
                    require_columns(table.name(), &fk.columns, &declared)?;
                    definitions.push(self.foreign_key_constraint(table.name(), fk)?);
                }
                TableCommand::AddIndex(index) => {
                    let definition = lookup(table.indexes(), *index)?;
                    require_columns(table.name(), &definition.columns, &declared)?;
                    trailing.push(self.create_index(table.name(), &qualified, definition)?);
                }
                TableCommand::SetComment(text) => {
                    trailing.push(format!("COMMENT ON TABLE {} IS {}", qualified, quote_literal(text)));
                }
                TableCommand::ModifyColumn(_)
                | TableCommand::DropColumn(_)
                | TableCommand::RenameColumn { .. }
                | TableCommand::DropIndex(_)
                | TableCommand::DropConstraint(_) => {
                    return Err(OrmError::validation(format!(
                        "Table '{}' is being created; drop, modify and rename belong in alter_table",
                        table.name()
                    )));
                }
            }
        }

        let mut statement = String::from("CREATE TABLE ");
        if if_not_exists {
            statement.push_str("IF NOT EXISTS ");
        }
        statement.push_str(&qualified);
        statement.push_str(" (\n    ");
        statement.push_str(&definitions.join(",\n    "));
        statement.push_str("\n)");

        let mut statements = vec![statement];
        statements.extend(trailing);
        Ok(statements)
    }

    /// One statement per declared change, in declaration order
    pub fn compile_alter(&self, table: &TableBuilder) -> OrmResult<Vec<String>> {
        if table.intent() != TableIntent::Alter {
            return Err(OrmError::validation(format!(
                "Blueprint for '{}' is a creation, not an alteration",
                table.name()
            )));
        }

        let qualified = self.qualify(table.name())?;
        let mut statements = Vec::new();

        for command in table.commands() {
            match command {
                TableCommand::AddColumn(index) => {
                    let column = lookup(table.columns(), *index)?;
                    statements.push(format!("ALTER TABLE {} ADD COLUMN {}", qualified, column.to_sql()?));
                    if let Some(comment) = column.comment_text() {
                        statements.push(self.column_comment(&qualified, column.name(), comment)?);
                    }
                }
                TableCommand::ModifyColumn(index) => {
                    let column = lookup(table.columns(), *index)?;
                    column.validate()?;
                    if column.column_type().is_serial() {
                        return Err(OrmError::validation(format!(
                            "Column '{}' cannot be changed to a serial type",
                            column.name()
                        )));
                    }
                    if column.is_primary() || column.is_unique() {
                        return Err(OrmError::validation(format!(
                            "Column '{}': add keys with primary() or unique() on the table",
                            column.name()
                        )));
                    }

                    let name = quote_identifier(column.name())?;
                    let sql_type = column.column_type().to_sql();
                    let mut actions = vec![format!(
                        "ALTER COLUMN {name} TYPE {sql_type} USING {name}::{sql_type}"
                    )];
                    actions.push(if column.is_nullable() {
                        format!("ALTER COLUMN {} DROP NOT NULL", name)
                    } else {
                        format!("ALTER COLUMN {} SET NOT NULL", name)
                    });
                    actions.push(match column.default_value() {
                        Some(default) => format!("ALTER COLUMN {} SET DEFAULT {}", name, default.to_sql()?),
                        None => format!("ALTER COLUMN {} DROP DEFAULT", name),
                    });
                    statements.push(format!("ALTER TABLE {} {}", qualified, actions.join(", ")));
                    if let Some(comment) = column.comment_text() {
                        statements.push(self.column_comment(&qualified, column.name(), comment)?);
                    }
                }
                TableCommand::DropColumn(name) => {
                    statements.push(format!("ALTER TABLE {} DROP COLUMN {}", qualified, quote_identifier(name)?));
                }
                TableCommand::RenameColumn { from, to } => {
                    statements.push(format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        qualified,
                        quote_identifier(from)?,
                        quote_identifier(to)?
                    ));
                }
                TableCommand::AddIndex(index) => {
                    let definition = lookup(table.indexes(), *index)?;
                    statements.push(self.create_index(table.name(), &qualified, definition)?);
                }
                TableCommand::DropIndex(name) => {
                    statements.push(format!("DROP INDEX {}", self.qualify(name)?));
                }
                TableCommand::AddPrimaryKey(columns) => {
                    statements.push(format!("ALTER TABLE {} ADD PRIMARY KEY ({})", qualified, quote_list(columns)?));
                }
                TableCommand::AddUnique(columns) => {
                    statements.push(format!(
                        "ALTER TABLE {} ADD {}",
                        qualified,
                        self.unique_constraint(table.name(), columns)?
                    ));
                }
                TableCommand::AddForeignKey(index) => {
                    let fk = lookup(table.foreign_keys(), *index)?;
                    statements.push(format!(
                        "ALTER TABLE {} ADD {}",
                        qualified,
                        self.foreign_key_constraint(table.name(), fk)?
                    ));
                }
                TableCommand::DropConstraint(name) => {
                    statements.push(format!("ALTER TABLE {} DROP CONSTRAINT {}", qualified, quote_identifier(name)?));
                }
                TableCommand::SetComment(text) => {
                    statements.push(format!("COMMENT ON TABLE {} IS {}", qualified, quote_literal(text)));
                }
            }
        }

        Ok(statements)
    }

    pub fn compile_drop(&self, table: &str, if_exists: bool) -> OrmResult<String> {
        let qualified = self.qualify(table)?;
        Ok(if if_exists {
            format!("DROP TABLE IF EXISTS {}", qualified)
        } else {
            format!("DROP TABLE {}", qualified)
        })
    }

    pub fn compile_rename(&self, from: &str, to: &str) -> OrmResult<String> {
        Ok(format!("ALTER TABLE {} RENAME TO {}", self.qualify(from)?, quote_identifier(to)?))
    }

    /// Column names added by a create blueprint; duplicates are rejected
    fn declared_columns(&self, table: &TableBuilder) -> OrmResult<HashSet<String>> {
        let mut declared = HashSet::new();
        for column in table.added_columns() {
            if !declared.insert(column.name().to_string()) {
                return Err(OrmError::validation(format!(
                    "Column '{}' is declared twice on table '{}'",
                    column.name(),
                    table.name()
                )));
            }
        }
        Ok(declared)
    }

    fn create_index(&self, table: &str, qualified: &str, definition: &IndexDefinition) -> OrmResult<String> {
        if definition.columns.is_empty() {
            return Err(OrmError::validation(format!("Index on '{}' has no columns", table)));
        }
        let name = match &definition.name {
            Some(name) => name.clone(),
            None => generated_name("idx", table, &definition.columns),
        };
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if definition.unique { "UNIQUE " } else { "" },
            quote_identifier(&name)?,
            qualified,
            quote_list(&definition.columns)?
        ))
    }

    fn unique_constraint(&self, table: &str, columns: &[String]) -> OrmResult<String> {
        if columns.is_empty() {
            return Err(OrmError::validation(format!("Unique constraint on '{}' has no columns", table)));
        }
        Ok(format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_identifier(&generated_name("uniq", table, columns))?,
            quote_list(columns)?
        ))
    }

    fn foreign_key_constraint(&self, table: &str, fk: &ForeignKeyDefinition) -> OrmResult<String> {
        if fk.references_table.is_empty() || fk.references_columns.is_empty() {
            return Err(OrmError::validation(format!(
                "Foreign key on '{}' is missing its referenced table or columns",
                table
            )));
        }
        if fk.columns.len() != fk.references_columns.len() {
            return Err(OrmError::validation(format!(
                "Foreign key on '{}' references {} columns with {} local columns",
                table,
                fk.references_columns.len(),
                fk.columns.len()
            )));
        }

        let name = match &fk.name {
            Some(name) => name.clone(),
            None => generated_name("fk", table, &fk.columns),
        };
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_identifier(&name)?,
            quote_list(&fk.columns)?,
            self.qualify(&fk.references_table)?,
            quote_list(&fk.references_columns)?
        );
        if let Some(action) = fk.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.as_sql());
        }
        if let Some(action) = fk.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.as_sql());
        }
        Ok(sql)
    }

    fn column_comment(&self, qualified: &str, column: &str, text: &str) -> OrmResult<String> {
        Ok(format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            qualified,
            quote_identifier(column)?,
            quote_literal(text)
        ))
    }
}

/// `{prefix}_{table}_{col1}_{col2}`, shortened to fit when too long
///
/// Long names keep a prefix cut on a char boundary and end in eight hex
/// digits of the full name's SHA-256, so the result is stable across runs.
pub fn generated_name(prefix: &str, table: &str, columns: &[String]) -> String {
    let full = format!("{}_{}_{}", prefix, table, columns.join("_"));
    if full.len() <= MAX_IDENTIFIER_LENGTH {
        return full;
    }

    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let suffix = &digest[..GENERATED_NAME_HASH_LENGTH];
    let mut cut = MAX_IDENTIFIER_LENGTH - GENERATED_NAME_HASH_LENGTH - 1;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", full[..cut].trim_end_matches('_'), suffix)
}

fn quote_list(columns: &[String]) -> OrmResult<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

fn require_columns(table: &str, columns: &[String], declared: &HashSet<String>) -> OrmResult<()> {
    match columns.iter().find(|c| !declared.contains(c.as_str())) {
        Some(missing) => Err(OrmError::validation(format!(
            "Table '{}' references undeclared column '{}'",
            table, missing
        ))),
        None => Ok(()),
    }
}

fn lookup<T>(items: &[T], index: usize) -> OrmResult<&T> {
    items
        .get(index)
        .ok_or_else(|| OrmError::validation(format!("Blueprint entry {} does not exist", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, ReferentialAction};

    fn compiler() -> DdlCompiler {
        DdlCompiler::new("public")
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_private_2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("drop table").is_err());
        assert!(validate_identifier("a\"b").is_err());
        assert!(validate_identifier(&"x".repeat(63)).is_ok());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_create_users_table() {
        let mut table = TableBuilder::create("users");
        table.id("id");
        table.string("name", Some(255)).not_null();
        table.string("email", Some(255)).not_null().unique();
        table.timestamps();

        let statements = compiler().compile_create(&table, false).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "CREATE TABLE \"public\".\"users\" (\n    \
             \"id\" BIGSERIAL NOT NULL PRIMARY KEY,\n    \
             \"name\" VARCHAR(255) NOT NULL,\n    \
             \"email\" VARCHAR(255) NOT NULL UNIQUE,\n    \
             \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
             \"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n)"
        );
    }

    #[test]
    fn test_each_column_appears_once() {
        let mut table = TableBuilder::create("metrics");
        table.increments("id").primary();
        table.decimal("amount", 10, 2);
        table.jsonb("payload");
        table.inet("source");
        table.array("tags", ColumnType::Text);

        let sql = &compiler().compile_create(&table, false).unwrap()[0];
        for column in table.columns() {
            let fragment = format!("\"{}\" {}", column.name(), column.column_type().to_sql());
            assert_eq!(sql.matches(&fragment).count(), 1, "{}", fragment);
        }
    }

    #[test]
    fn test_composite_primary_key() {
        let mut table = TableBuilder::create("memberships");
        table.big_integer("user_id").primary();
        table.big_integer("team_id").primary();

        let sql = &compiler().compile_create(&table, false).unwrap()[0];
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"team_id\")"));
        assert!(!sql.contains("NOT NULL PRIMARY KEY"));

        let mut explicit = TableBuilder::create("memberships");
        explicit.big_integer("user_id");
        explicit.big_integer("team_id");
        explicit.primary(&["user_id", "team_id"]);
        let sql = &compiler().compile_create(&explicit, false).unwrap()[0];
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"team_id\")"));
    }

    #[test]
    fn test_conflicting_primary_keys_rejected() {
        let mut table = TableBuilder::create("memberships");
        table.big_integer("user_id").primary();
        table.big_integer("team_id");
        table.primary(&["team_id"]);
        assert!(compiler().compile_create(&table, false).unwrap_err().is_validation());
    }

    #[test]
    fn test_create_with_constraints_indexes_and_comments() {
        let mut table = TableBuilder::create("posts");
        table.id("id");
        table.big_integer("user_id").not_null();
        table.string("slug", Some(120)).not_null().comment("URL fragment");
        table.unique(&["user_id", "slug"]);
        table
            .foreign("user_id")
            .references("users", "id")
            .on_delete(ReferentialAction::Cascade);
        table.index(&["user_id"]);
        table.comment("Blog posts");

        let statements = compiler().compile_create(&table, true).unwrap();
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"posts\""));
        assert!(statements[0].contains("CONSTRAINT \"uniq_posts_user_id_slug\" UNIQUE (\"user_id\", \"slug\")"));
        assert!(statements[0].contains(
            "CONSTRAINT \"fk_posts_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\") ON DELETE CASCADE"
        ));
        assert_eq!(
            &statements[1..],
            &[
                "COMMENT ON COLUMN \"public\".\"posts\".\"slug\" IS 'URL fragment'".to_string(),
                "CREATE INDEX \"idx_posts_user_id\" ON \"public\".\"posts\" (\"user_id\")".to_string(),
                "COMMENT ON TABLE \"public\".\"posts\" IS 'Blog posts'".to_string(),
            ]
        );
    }

    #[test]
    fn test_create_rejects_invalid_blueprints() {
        let mut duplicate = TableBuilder::create("users");
        duplicate.text("name");
        duplicate.text("name");
        assert!(compiler().compile_create(&duplicate, false).unwrap_err().is_validation());

        let mut unknown_index = TableBuilder::create("users");
        unknown_index.text("name");
        unknown_index.index(&["email"]);
        assert!(compiler().compile_create(&unknown_index, false).unwrap_err().is_validation());

        let mut drop_in_create = TableBuilder::create("users");
        drop_in_create.text("name");
        drop_in_create.drop_column("legacy");
        assert!(compiler().compile_create(&drop_in_create, false).unwrap_err().is_validation());

        let mut bad_size = TableBuilder::create("users");
        bad_size.string("name", Some(0));
        assert!(compiler().compile_create(&bad_size, false).unwrap_err().is_validation());

        let mut dangling_fk = TableBuilder::create("posts");
        dangling_fk.big_integer("user_id");
        dangling_fk.foreign("user_id");
        assert!(compiler().compile_create(&dangling_fk, false).unwrap_err().is_validation());

        let bad_name = TableBuilder::create("users; DROP TABLE x");
        assert!(compiler().compile_create(&bad_name, false).unwrap_err().is_validation());
    }

    #[test]
    fn test_alter_statements_in_order() {
        let mut table = TableBuilder::alter("users");
        table.string("phone", Some(32));
        table.change_column("name", ColumnType::Text).not_null();
        table.rename_column("name", "full_name");
        table.drop_column("legacy");
        table.unique_index(&["phone"]);
        table.drop_index("idx_users_old");
        table.drop_constraint("fk_users_team_id");

        let statements = compiler().compile_alter(&table).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"users\" ADD COLUMN \"phone\" VARCHAR(32)".to_string(),
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"name\" TYPE TEXT USING \"name\"::TEXT, \
                 ALTER COLUMN \"name\" SET NOT NULL, ALTER COLUMN \"name\" DROP DEFAULT"
                    .to_string(),
                "ALTER TABLE \"public\".\"users\" RENAME COLUMN \"name\" TO \"full_name\"".to_string(),
                "ALTER TABLE \"public\".\"users\" DROP COLUMN \"legacy\"".to_string(),
                "CREATE UNIQUE INDEX \"idx_users_phone\" ON \"public\".\"users\" (\"phone\")".to_string(),
                "DROP INDEX \"public\".\"idx_users_old\"".to_string(),
                "ALTER TABLE \"public\".\"users\" DROP CONSTRAINT \"fk_users_team_id\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_long_generated_names_are_shortened() {
        let mut table = TableBuilder::create("customer_subscription_entitlements");
        table.id("id");
        table.string("external_billing_reference", Some(64)).not_null();
        table.big_integer("billing_account_identifier");
        table.index(&["external_billing_reference"]);
        table.unique(&["external_billing_reference", "billing_account_identifier"]);
        table.foreign("billing_account_identifier").references("billing_accounts", "id");

        let statements = compiler().compile_create(&table, false).unwrap();
        assert_eq!(statements.len(), 2);

        let index_name = generated_name(
            "idx",
            "customer_subscription_entitlements",
            &["external_billing_reference".to_string()],
        );
        assert_eq!(index_name.len(), MAX_IDENTIFIER_LENGTH);
        assert!(index_name.starts_with("idx_customer_subscription_entitlements_external_"));
        assert!(validate_identifier(&index_name).is_ok());
        assert!(statements[1].contains(&format!("\"{}\"", index_name)));

        // Stable across calls, distinct for distinct column lists
        assert_eq!(
            index_name,
            generated_name("idx", "customer_subscription_entitlements", &["external_billing_reference".to_string()])
        );
        assert_ne!(
            index_name,
            generated_name("idx", "customer_subscription_entitlements", &["external_billing_reference_2".to_string()])
        );
        assert_eq!(generated_name("idx", "posts", &["user_id".to_string()]), "idx_posts_user_id");
    }

    #[test]
    fn test_alter_rejects_serial_change() {
        let mut table = TableBuilder::alter("users");
        table.change_column("id", ColumnType::BigSerial);
        assert!(compiler().compile_alter(&table).unwrap_err().is_validation());
    }

    #[test]
    fn test_drop_and_rename() {
        assert_eq!(compiler().compile_drop("users", false).unwrap(), "DROP TABLE \"public\".\"users\"");
        assert_eq!(
            compiler().compile_drop("users", true).unwrap(),
            "DROP TABLE IF EXISTS \"public\".\"users\""
        );
        assert_eq!(
            DdlCompiler::new("app").compile_rename("users", "members").unwrap(),
            "ALTER TABLE \"app\".\"users\" RENAME TO \"members\""
        );
        assert!(compiler().compile_rename("users", "bad-name").is_err());
    }
}
