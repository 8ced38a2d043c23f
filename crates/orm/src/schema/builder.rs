//! Schema builder
//!
//! The handle a changeset receives. It wraps the changeset's open transaction,
//! checks the live catalog before destructive or conflicting operations, and
//! executes compiled DDL. It never opens, commits or rolls back a transaction.

use std::collections::HashSet;
use tracing::debug;

use crate::backends::{DatabaseTransaction, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use super::compiler::DdlCompiler;
use super::introspector::{Introspector, TableShape};
use super::table::{TableBuilder, TableCommand, TableIntent};

pub struct SchemaBuilder<'a> {
    tx: &'a mut dyn DatabaseTransaction,
    compiler: DdlCompiler,
    introspector: Introspector,
}

impl<'a> SchemaBuilder<'a> {
    /// Builder for tables in `schema`, executing through `tx`
    pub fn new(tx: &'a mut dyn DatabaseTransaction, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        Self {
            tx,
            compiler: DdlCompiler::new(schema.clone()),
            introspector: Introspector::new(schema),
        }
    }

    pub fn schema(&self) -> &str {
        self.compiler.schema()
    }

    pub fn compiler(&self) -> &DdlCompiler {
        &self.compiler
    }

    pub async fn has_table(&mut self, table: &str) -> OrmResult<bool> {
        self.introspector.has_table(&mut *self.tx, table).await
    }

    pub async fn has_column(&mut self, table: &str, column: &str) -> OrmResult<bool> {
        self.introspector.has_column(&mut *self.tx, table, column).await
    }

    /// Live shape of `table`
    pub async fn get_table_schema(&mut self, table: &str) -> OrmResult<TableShape> {
        self.introspector
            .describe_table(&mut *self.tx, table)
            .await?
            .ok_or_else(|| OrmError::not_found(format!("Table '{}.{}' does not exist", self.schema(), table)))
    }

    /// Create a table; fails with a conflict if it already exists
    pub async fn create_table<F>(&mut self, table: &str, build: F) -> OrmResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut blueprint = TableBuilder::create(table);
        build(&mut blueprint);
        self.build(&blueprint).await
    }

    /// Create a table unless it exists; returns whether it was created
    pub async fn create_table_if_not_exists<F>(&mut self, table: &str, build: F) -> OrmResult<bool>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut blueprint = TableBuilder::create(table);
        build(&mut blueprint);
        let statements = self.compiler.compile_create(&blueprint, true)?;

        if self.has_table(table).await? {
            debug!("Table {}.{} already exists, skipping create", self.schema(), table);
            return Ok(false);
        }

        self.execute_all(&statements).await?;
        Ok(true)
    }

    /// Alter an existing table
    pub async fn alter_table<F>(&mut self, table: &str, build: F) -> OrmResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut blueprint = TableBuilder::alter(table);
        build(&mut blueprint);
        self.build(&blueprint).await
    }

    /// Apply a prepared blueprint according to its intent
    pub async fn build(&mut self, blueprint: &TableBuilder) -> OrmResult<()> {
        let statements = self.compiler.compile(blueprint)?;

        match blueprint.intent() {
            TableIntent::Create => {
                if self.has_table(blueprint.name()).await? {
                    return Err(OrmError::conflict(format!(
                        "Table '{}.{}' already exists",
                        self.schema(),
                        blueprint.name()
                    )));
                }
            }
            TableIntent::Alter => {
                let shape = self.get_table_schema(blueprint.name()).await?;
                check_alterations(&shape, blueprint)?;
            }
        }

        self.execute_all(&statements).await
    }

    /// Drop a table; fails if it does not exist
    pub async fn drop_table(&mut self, table: &str) -> OrmResult<()> {
        let statement = self.compiler.compile_drop(table, false)?;
        if !self.has_table(table).await? {
            return Err(OrmError::not_found(format!(
                "Table '{}.{}' does not exist",
                self.schema(),
                table
            )));
        }
        self.execute(&statement).await
    }

    /// Drop a table if present; returns whether it existed
    pub async fn drop_table_if_exists(&mut self, table: &str) -> OrmResult<bool> {
        let statement = self.compiler.compile_drop(table, true)?;
        let existed = self.has_table(table).await?;
        self.execute(&statement).await?;
        Ok(existed)
    }

    pub async fn rename_table(&mut self, from: &str, to: &str) -> OrmResult<()> {
        let statement = self.compiler.compile_rename(from, to)?;
        if !self.has_table(from).await? {
            return Err(OrmError::not_found(format!(
                "Table '{}.{}' does not exist",
                self.schema(),
                from
            )));
        }
        if self.has_table(to).await? {
            return Err(OrmError::conflict(format!(
                "Table '{}.{}' already exists",
                self.schema(),
                to
            )));
        }
        self.execute(&statement).await
    }

    /// Execute a statement as-is, with no validation or catalog checks
    pub async fn raw(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!("Executing raw statement: {}", sql);
        self.tx.execute(sql, params).await
    }

    async fn execute(&mut self, statement: &str) -> OrmResult<()> {
        debug!("Executing DDL: {}", statement);
        self.tx.execute(statement, &[]).await?;
        Ok(())
    }

    async fn execute_all(&mut self, statements: &[String]) -> OrmResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }
}

/// Replay the blueprint's column changes against the live column set
fn check_alterations(shape: &TableShape, blueprint: &TableBuilder) -> OrmResult<()> {
    let mut columns: HashSet<&str> = shape.columns.iter().map(|c| c.name.as_str()).collect();
    let table = blueprint.name();

    let missing = |column: &str| {
        OrmError::conflict(format!("Column '{}' does not exist on table '{}'", column, table))
    };
    let present = |column: &str| {
        OrmError::conflict(format!("Column '{}' already exists on table '{}'", column, table))
    };

    for command in blueprint.commands() {
        match command {
            TableCommand::AddColumn(index) => {
                let name = column_name(blueprint, *index)?;
                if !columns.insert(name) {
                    return Err(present(name));
                }
            }
            TableCommand::ModifyColumn(index) => {
                let name = column_name(blueprint, *index)?;
                if !columns.contains(name) {
                    return Err(missing(name));
                }
            }
            TableCommand::DropColumn(name) => {
                if !columns.remove(name.as_str()) {
                    return Err(missing(name));
                }
            }
            TableCommand::RenameColumn { from, to } => {
                if !columns.contains(from.as_str()) {
                    return Err(missing(from));
                }
                if columns.contains(to.as_str()) {
                    return Err(present(to));
                }
                columns.remove(from.as_str());
                columns.insert(to.as_str());
            }
            TableCommand::AddIndex(index) => {
                if let Some(definition) = blueprint.indexes().get(*index) {
                    if let Some(column) = definition.columns.iter().find(|c| !columns.contains(c.as_str())) {
                        return Err(missing(column));
                    }
                }
            }
            TableCommand::AddPrimaryKey(keys) | TableCommand::AddUnique(keys) => {
                if let Some(column) = keys.iter().find(|c| !columns.contains(c.as_str())) {
                    return Err(missing(column));
                }
            }
            TableCommand::AddForeignKey(index) => {
                if let Some(fk) = blueprint.foreign_keys().get(*index) {
                    if let Some(column) = fk.columns.iter().find(|c| !columns.contains(c.as_str())) {
                        return Err(missing(column));
                    }
                }
            }
            TableCommand::DropIndex(_) | TableCommand::DropConstraint(_) | TableCommand::SetComment(_) => {}
        }
    }

    Ok(())
}

fn column_name(blueprint: &TableBuilder, index: usize) -> OrmResult<&str> {
    blueprint
        .columns()
        .get(index)
        .map(|c| c.name())
        .ok_or_else(|| OrmError::validation(format!("Blueprint column {} does not exist", index)))
}
