//! Declarative changeset documents
//!
//! A `.yaml` changeset lists schema operations for each direction:
//!
//! ```yaml
//! up:
//!   - op: create_table
//!     table: users
//!     columns:
//!       - { name: id, type: bigserial, primary: true }
//!       - { name: email, type: "varchar(255)", nullable: false, unique: true }
//! down:
//!   - op: drop_table
//!     table: users
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::schema::{
    validate_identifier, ColumnDescriptor, ColumnType, DdlCompiler, DefaultValue, ReferentialAction,
    SchemaBuilder, TableBuilder,
};

/// Both directions of a declarative changeset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangesetDocument {
    #[serde(default)]
    pub up: Vec<SchemaOperation>,
    #[serde(default)]
    pub down: Vec<SchemaOperation>,
}

impl ChangesetDocument {
    pub fn from_yaml(content: &str) -> OrmResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Compile every operation without executing anything
    pub fn validate(&self, compiler: &DdlCompiler) -> OrmResult<()> {
        for operation in self.up.iter().chain(&self.down) {
            operation.validate(compiler)?;
        }
        Ok(())
    }
}

/// One schema operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable(TableSpec),
    AlterTable(AlterSpec),
    DropTable {
        table: String,
        #[serde(default)]
        if_exists: bool,
    },
    RenameTable {
        from: String,
        to: String,
    },
    Raw {
        sql: String,
    },
}

impl SchemaOperation {
    /// Check the operation without touching the database
    pub fn validate(&self, compiler: &DdlCompiler) -> OrmResult<()> {
        match self {
            SchemaOperation::CreateTable(spec) => {
                compiler.compile_create(&spec.to_blueprint()?, spec.if_not_exists)?;
                Ok(())
            }
            SchemaOperation::AlterTable(spec) => {
                compiler.compile_alter(&spec.to_blueprint()?)?;
                Ok(())
            }
            SchemaOperation::DropTable { table, .. } => validate_identifier(table),
            SchemaOperation::RenameTable { from, to } => {
                validate_identifier(from)?;
                validate_identifier(to)
            }
            SchemaOperation::Raw { sql } if sql.trim().is_empty() => {
                Err(OrmError::validation("Raw operation has no SQL"))
            }
            SchemaOperation::Raw { .. } => Ok(()),
        }
    }

    /// Apply the operation through `schema`
    pub async fn apply(&self, schema: &mut SchemaBuilder<'_>) -> OrmResult<()> {
        match self {
            SchemaOperation::CreateTable(spec) if spec.if_not_exists => {
                let blueprint = spec.to_blueprint()?;
                schema.create_table_if_not_exists(&spec.table, |t| *t = blueprint).await?;
                Ok(())
            }
            SchemaOperation::CreateTable(spec) => schema.build(&spec.to_blueprint()?).await,
            SchemaOperation::AlterTable(spec) => schema.build(&spec.to_blueprint()?).await,
            SchemaOperation::DropTable { table, if_exists: true } => {
                schema.drop_table_if_exists(table).await.map(|_| ())
            }
            SchemaOperation::DropTable { table, if_exists: false } => schema.drop_table(table).await,
            SchemaOperation::RenameTable { from, to } => schema.rename_table(from, to).await,
            SchemaOperation::Raw { sql } => schema.raw(sql, &[]).await.map(|_| ()),
        }
    }
}

/// Literal default in a column spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultSpec {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&DefaultSpec> for DefaultValue {
    fn from(spec: &DefaultSpec) -> Self {
        match spec {
            DefaultSpec::Bool(b) => DefaultValue::Bool(*b),
            DefaultSpec::Integer(i) => DefaultValue::Integer(*i),
            DefaultSpec::Float(f) => DefaultValue::Float(*f),
            DefaultSpec::Text(s) => DefaultValue::Text(s.clone()),
        }
    }
}

fn nullable_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    /// SQL type text, e.g. `bigint`, `varchar(255)`, `numeric(10, 2)`, `text[]`
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "nullable_by_default")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<DefaultSpec>,
    /// Raw SQL default expression; wins over `default`
    #[serde(default)]
    pub default_raw: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ColumnSpec {
    fn apply_to(&self, column: &mut ColumnDescriptor) {
        if self.nullable {
            column.nullable();
        } else {
            column.not_null();
        }
        match (&self.default_raw, &self.default) {
            (Some(raw), _) => {
                column.default_raw(raw.clone());
            }
            (None, Some(literal)) => {
                column.default(DefaultValue::from(literal));
            }
            (None, None) => {}
        }
        if self.primary {
            column.primary();
        }
        if self.unique {
            column.unique();
        }
        if let Some(comment) = &self.comment {
            column.comment(comment.clone());
        }
    }

    fn parsed_type(&self) -> OrmResult<ColumnType> {
        self.column_type.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    pub column: String,
    pub references: String,
    #[serde(default = "default_referenced_column")]
    pub on_column: String,
    #[serde(default)]
    pub on_delete: Option<ReferentialAction>,
    #[serde(default)]
    pub on_update: Option<ReferentialAction>,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_referenced_column() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub table: String,
    #[serde(default)]
    pub if_not_exists: bool,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Composite primary key
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Multi-column unique constraints
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl TableSpec {
    pub fn to_blueprint(&self) -> OrmResult<TableBuilder> {
        let mut table = TableBuilder::create(&self.table);
        for spec in &self.columns {
            let column = table.column(&spec.name, spec.parsed_type()?);
            spec.apply_to(column);
        }
        if !self.primary_key.is_empty() {
            table.primary(&as_strs(&self.primary_key));
        }
        for columns in &self.unique {
            table.unique(&as_strs(columns));
        }
        for fk in &self.foreign_keys {
            add_foreign_key(&mut table, fk);
        }
        for index in &self.indexes {
            add_index(&mut table, index);
        }
        if let Some(comment) = &self.comment {
            table.comment(comment.clone());
        }
        Ok(table)
    }
}

/// One alteration, applied in list order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AlterStep {
    AddColumn(ColumnSpec),
    ModifyColumn(ColumnSpec),
    DropColumn { column: String },
    RenameColumn { from: String, to: String },
    AddIndex(IndexSpec),
    DropIndex { name: String },
    AddUnique { columns: Vec<String> },
    AddPrimaryKey { columns: Vec<String> },
    AddForeignKey(ForeignKeySpec),
    DropConstraint { name: String },
    Comment { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlterSpec {
    pub table: String,
    #[serde(default)]
    pub steps: Vec<AlterStep>,
}

impl AlterSpec {
    pub fn to_blueprint(&self) -> OrmResult<TableBuilder> {
        let mut table = TableBuilder::alter(&self.table);
        for step in &self.steps {
            match step {
                AlterStep::AddColumn(spec) => {
                    let column = table.column(&spec.name, spec.parsed_type()?);
                    spec.apply_to(column);
                }
                AlterStep::ModifyColumn(spec) => {
                    let column = table.change_column(&spec.name, spec.parsed_type()?);
                    spec.apply_to(column);
                }
                AlterStep::DropColumn { column } => table.drop_column(column),
                AlterStep::RenameColumn { from, to } => table.rename_column(from, to),
                AlterStep::AddIndex(index) => add_index(&mut table, index),
                AlterStep::DropIndex { name } => table.drop_index(name),
                AlterStep::AddUnique { columns } => table.unique(&as_strs(columns)),
                AlterStep::AddPrimaryKey { columns } => table.primary(&as_strs(columns)),
                AlterStep::AddForeignKey(fk) => add_foreign_key(&mut table, fk),
                AlterStep::DropConstraint { name } => table.drop_constraint(name),
                AlterStep::Comment { text } => table.comment(text.clone()),
            }
        }
        Ok(table)
    }
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn add_index(table: &mut TableBuilder, spec: &IndexSpec) {
    let columns = as_strs(&spec.columns);
    match &spec.name {
        Some(name) => {
            table.index_named(name, &columns, spec.unique);
        }
        None if spec.unique => {
            table.unique_index(&columns);
        }
        None => {
            table.index(&columns);
        }
    }
}

fn add_foreign_key(table: &mut TableBuilder, spec: &ForeignKeySpec) {
    let fk = table.foreign(&spec.column);
    fk.references(&spec.references, &spec.on_column);
    if let Some(action) = spec.on_delete {
        fk.on_delete(action);
    }
    if let Some(action) = spec.on_update {
        fk.on_update(action);
    }
    if let Some(name) = &spec.name {
        fk.named(name);
    }
}
