//! In-memory database backend for tests
//!
//! [`MemoryDatabase`] implements [`DatabasePool`] over a small catalog.
//! Statements are parsed with `sqlparser`'s PostgreSQL dialect and applied to
//! the catalog; it understands the DDL this crate compiles, the catalog queries the
//! introspector issues, and the INSERT/DELETE/SELECT shapes the ledger uses.
//! Transactions work on a private copy of the catalog; commit publishes it and
//! rollback discards it. Statements it does not understand fail the way a
//! server rejects bad SQL, and [`MemoryDatabase::fail_on`] injects failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::Mutex;

use sqlparser::ast::{
    AlterColumnOperation, AlterTableOperation, BinaryOperator, ColumnDef, ColumnOption, CommentObject, CreateIndex,
    CreateTable, DataType, Delete, Expr, FromTable, Ident, Insert, ObjectName, ObjectType, SelectItem, SetExpr,
    Statement, TableConstraint, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::backends::{DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use crate::schema::introspector::queries;
use crate::schema::ColumnType;

const DEFAULT_SCHEMA: &str = "public";

/// Shared handle to an in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<SharedState>>,
}

#[derive(Debug, Default)]
struct SharedState {
    catalog: Catalog,
    committed: Vec<String>,
    fail_on: Vec<String>,
    unavailable: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement containing `fragment` fail in transactions begun afterwards
    pub async fn fail_on(&self, fragment: impl Into<String>) {
        self.state.lock().await.fail_on.push(fragment.into());
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.fail_on.clear();
    }

    /// Refuse new transactions, as an unreachable server would
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn has_table(&self, schema: &str, table: &str) -> bool {
        self.state.lock().await.catalog.table(schema, table).is_ok()
    }

    /// Committed table names in `schema`, sorted
    pub async fn table_names(&self, schema: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .catalog
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Committed column names of a table in ordinal order
    pub async fn column_names(&self, schema: &str, table: &str) -> Vec<String> {
        match self.state.lock().await.catalog.table(schema, table) {
            Ok(t) => t.columns.iter().map(|c| c.name.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Committed rows of a table
    pub async fn rows(&self, schema: &str, table: &str) -> Vec<HashMap<String, DatabaseValue>> {
        match self.state.lock().await.catalog.table(schema, table) {
            Ok(t) => t.rows.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Statements of committed transactions, in commit order
    pub async fn committed_statements(&self) -> Vec<String> {
        self.state.lock().await.committed.clone()
    }
}

#[async_trait]
impl DatabasePool for MemoryDatabase {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(OrmError::configuration("connection refused"));
        }
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            catalog: state.catalog.clone(),
            executed: Vec::new(),
            fail_on: state.fail_on.clone(),
        }))
    }

    async fn close(&self) -> OrmResult<()> {
        Ok(())
    }
}

/// Transaction over a private copy of the catalog
pub struct MemoryTransaction {
    shared: Arc<Mutex<SharedState>>,
    catalog: Catalog,
    executed: Vec<String>,
    fail_on: Vec<String>,
}

impl MemoryTransaction {
    fn check_injected(&self, sql: &str) -> OrmResult<()> {
        match self.fail_on.iter().find(|fragment| sql.contains(fragment.as_str())) {
            Some(fragment) => Err(OrmError::execution(format!("injected failure on '{}'", fragment))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.check_injected(sql)?;
        let affected = self.catalog.execute(sql, params)?;
        self.executed.push(sql.to_string());
        Ok(affected)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.check_injected(sql)?;
        let rows = self.catalog.query(sql, params)?;
        Ok(rows.into_iter().map(|row| Box::new(row) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        let this = *self;
        let mut state = this.shared.lock().await;
        state.catalog = this.catalog;
        state.committed.extend(this.executed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        Ok(())
    }
}

/// Result row produced by the in-memory catalog
#[derive(Debug, Clone)]
pub struct MemoryRow {
    values: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow for MemoryRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.values
            .get(index)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| OrmError::execution(format!("Column index {} out of range", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| OrmError::execution(format!("Column '{}' not found", name)))
    }

    fn column_count(&self) -> usize {
        self.values.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.values.iter().map(|(n, _)| n.clone()).collect()
    }
}

fn row(values: Vec<(&str, DatabaseValue)>) -> MemoryRow {
    MemoryRow {
        values: values.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
    }
}

type TableKey = (String, String);

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: BTreeMap<TableKey, MemoryTable>,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<MemoryColumn>,
    primary_key: Vec<String>,
    indexes: Vec<MemoryIndex>,
    foreign_keys: Vec<String>,
    comment: Option<String>,
    rows: Vec<HashMap<String, DatabaseValue>>,
}

#[derive(Debug, Clone)]
struct MemoryColumn {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    default: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryIndex {
    name: String,
    columns: Vec<String>,
    unique: bool,
    primary: bool,
}

/// Column definition read from a parsed `ColumnDef`
struct ParsedColumn<'d> {
    column: MemoryColumn,
    primary: bool,
    unique: bool,
    references: Option<(&'d ObjectName, &'d [Ident])>,
}

/// `column = value` filter of a DELETE or SELECT
type Predicate = Option<(String, DatabaseValue)>;

fn parse(sql: &str) -> OrmResult<Vec<Statement>> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| OrmError::execution(format!("syntax error: {}", e)))
}

fn unsupported(what: impl std::fmt::Display) -> OrmError {
    OrmError::execution(format!("not supported by the in-memory database: {}", what))
}

fn undefined_table(key: &TableKey) -> OrmError {
    OrmError::execution(format!("relation \"{}.{}\" does not exist", key.0, key.1))
}

fn undefined_column(column: &str) -> OrmError {
    OrmError::execution(format!("column \"{}\" does not exist", column))
}

/// Quoted identifiers keep their case, bare ones fold to lower case
fn ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn idents(list: &[Ident]) -> Vec<String> {
    list.iter().map(ident).collect()
}

/// `schema.table`, defaulting the schema to `public`
fn table_key(name: &ObjectName) -> OrmResult<TableKey> {
    match name.0.as_slice() {
        [table] => Ok((DEFAULT_SCHEMA.to_string(), ident(table))),
        [schema, table] => Ok((ident(schema), ident(table))),
        _ => Err(OrmError::execution(format!("improper qualified name: {}", name))),
    }
}

fn relation_key(tables: &[TableWithJoins]) -> OrmResult<TableKey> {
    match tables {
        [TableWithJoins { relation: TableFactor::Table { name, .. }, joins }] if joins.is_empty() => table_key(name),
        _ => Err(unsupported("queries over more than one relation")),
    }
}

fn parse_type(data_type: &DataType) -> OrmResult<ColumnType> {
    data_type
        .to_string()
        .parse()
        .map_err(|_| OrmError::execution(format!("type \"{}\" does not exist", data_type)))
}

fn parse_column(def: &ColumnDef) -> OrmResult<ParsedColumn<'_>> {
    let mut parsed = ParsedColumn {
        column: MemoryColumn {
            name: ident(&def.name),
            column_type: parse_type(&def.data_type)?,
            nullable: true,
            default: None,
        },
        primary: false,
        unique: false,
        references: None,
    };

    for option in &def.options {
        match &option.option {
            ColumnOption::Null => parsed.column.nullable = true,
            ColumnOption::NotNull => parsed.column.nullable = false,
            ColumnOption::Default(expr) => parsed.column.default = Some(expr.to_string()),
            ColumnOption::Unique { is_primary: true, .. } => {
                parsed.primary = true;
                parsed.column.nullable = false;
            }
            ColumnOption::Unique { is_primary: false, .. } => parsed.unique = true,
            ColumnOption::ForeignKey { foreign_table, referred_columns, .. } => {
                parsed.references = Some((foreign_table, referred_columns.as_slice()));
            }
            other => return Err(unsupported(format!("column option {}", other))),
        }
    }
    Ok(parsed)
}

fn placeholder(text: &str, params: &[DatabaseValue]) -> OrmResult<DatabaseValue> {
    let position: usize = text
        .strip_prefix('$')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| unsupported(format!("placeholder {}", text)))?;
    position
        .checked_sub(1)
        .and_then(|i| params.get(i))
        .cloned()
        .ok_or_else(|| OrmError::execution(format!("there is no parameter ${}", position)))
}

fn literal(expr: &Expr, params: &[DatabaseValue]) -> OrmResult<DatabaseValue> {
    match expr {
        Expr::Value(Value::Placeholder(text)) => placeholder(text, params),
        Expr::Value(Value::Null) => Ok(DatabaseValue::Null),
        Expr::Value(Value::Boolean(b)) => Ok(DatabaseValue::Bool(*b)),
        Expr::Value(Value::SingleQuotedString(s)) => Ok(DatabaseValue::String(s.clone())),
        Expr::Value(Value::Number(n, _)) => n
            .to_string()
            .parse::<i64>()
            .map(DatabaseValue::Int64)
            .map_err(|_| unsupported(format!("numeric literal {}", n))),
        other => Err(unsupported(format!("expression {}", other))),
    }
}

fn predicate(selection: Option<&Expr>, params: &[DatabaseValue]) -> OrmResult<Predicate> {
    match selection {
        None => Ok(None),
        Some(Expr::BinaryOp { left, op: BinaryOperator::Eq, right }) => match left.as_ref() {
            Expr::Identifier(column) => Ok(Some((ident(column), literal(right, params)?))),
            other => Err(unsupported(format!("filter on {}", other))),
        },
        Some(other) => Err(unsupported(format!("filter {}", other))),
    }
}

fn row_matches(row: &HashMap<String, DatabaseValue>, predicate: &Predicate) -> bool {
    match predicate {
        None => true,
        Some((column, value)) => row.get(column) == Some(value),
    }
}

impl MemoryTable {
    fn column(&self, name: &str) -> OrmResult<&MemoryColumn> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| undefined_column(name))
    }

    fn column_mut(&mut self, name: &str) -> OrmResult<&mut MemoryColumn> {
        self.columns.iter_mut().find(|c| c.name == name).ok_or_else(|| undefined_column(name))
    }

    fn require_columns(&self, columns: &[String]) -> OrmResult<()> {
        for column in columns {
            self.column(column)?;
        }
        Ok(())
    }

    fn add_column(&mut self, table: &str, parsed: ParsedColumn<'_>) -> OrmResult<()> {
        let name = parsed.column.name.clone();
        if self.columns.iter().any(|c| c.name == name) {
            return Err(OrmError::execution(format!("column \"{}\" specified more than once", name)));
        }
        let mut column = parsed.column;
        if column.column_type.is_serial() {
            column.nullable = false;
            column.default = Some(format!("nextval('{}_{}_seq'::regclass)", table, name));
        }
        if !column.nullable && column.default.is_none() && !self.rows.is_empty() {
            return Err(OrmError::execution(format!("column \"{}\" contains null values", name)));
        }
        self.columns.push(column);
        if parsed.primary {
            self.set_primary_key(table, None, vec![name.clone()])?;
        }
        if parsed.unique {
            self.indexes.push(MemoryIndex {
                name: format!("{}_{}_key", table, name),
                columns: vec![name],
                unique: true,
                primary: false,
            });
        }
        Ok(())
    }

    fn set_primary_key(&mut self, table: &str, name: Option<String>, columns: Vec<String>) -> OrmResult<()> {
        if !self.primary_key.is_empty() {
            return Err(OrmError::execution(format!(
                "multiple primary keys for table \"{}\" are not allowed",
                table
            )));
        }
        self.require_columns(&columns)?;
        for column in &columns {
            self.column_mut(column)?.nullable = false;
        }
        self.indexes.push(MemoryIndex {
            name: name.unwrap_or_else(|| format!("{}_pkey", table)),
            columns: columns.clone(),
            unique: true,
            primary: true,
        });
        self.primary_key = columns;
        Ok(())
    }

    fn drop_column(&mut self, name: &str) -> OrmResult<()> {
        self.column(name)?;
        self.columns.retain(|c| c.name != name);
        self.indexes.retain(|i| !i.columns.iter().any(|c| c == name));
        if self.primary_key.iter().any(|c| c == name) {
            self.primary_key.clear();
        }
        for row in &mut self.rows {
            row.remove(name);
        }
        Ok(())
    }

    fn rename_column(&mut self, from: &str, to: &str) -> OrmResult<()> {
        if self.column(to).is_ok() {
            return Err(OrmError::execution(format!("column \"{}\" already exists", to)));
        }
        self.column_mut(from)?.name = to.to_string();
        for columns in self
            .indexes
            .iter_mut()
            .map(|i| &mut i.columns)
            .chain(std::iter::once(&mut self.primary_key))
        {
            for column in columns.iter_mut().filter(|c| c.as_str() == from) {
                *column = to.to_string();
            }
        }
        for row in &mut self.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        Ok(())
    }

    fn drop_constraint(&mut self, name: &str, if_exists: bool) -> OrmResult<()> {
        if let Some(position) = self.foreign_keys.iter().position(|fk| fk == name) {
            self.foreign_keys.remove(position);
            return Ok(());
        }
        match self.indexes.iter().find(|i| i.name == name).map(|i| i.primary) {
            Some(primary) => {
                if primary {
                    self.primary_key.clear();
                }
                self.indexes.retain(|i| i.name != name);
                Ok(())
            }
            None if if_exists => Ok(()),
            None => Err(OrmError::execution(format!("constraint \"{}\" does not exist", name))),
        }
    }
}

fn alter_column(column: &mut MemoryColumn, op: &AlterColumnOperation) -> OrmResult<()> {
    match op {
        AlterColumnOperation::SetNotNull => column.nullable = false,
        AlterColumnOperation::DropNotNull => column.nullable = true,
        AlterColumnOperation::SetDefault { value } => column.default = Some(value.to_string()),
        AlterColumnOperation::DropDefault => column.default = None,
        AlterColumnOperation::SetDataType { data_type, .. } => column.column_type = parse_type(data_type)?,
        other => return Err(unsupported(format!("ALTER COLUMN {}", other))),
    }
    Ok(())
}

impl Catalog {
    fn table(&self, schema: &str, table: &str) -> OrmResult<&MemoryTable> {
        let key = (schema.to_string(), table.to_string());
        self.tables.get(&key).ok_or_else(|| undefined_table(&key))
    }

    fn table_mut(&mut self, key: &TableKey) -> OrmResult<&mut MemoryTable> {
        self.tables.get_mut(key).ok_or_else(|| undefined_table(key))
    }

    fn index_exists(&self, schema: &str, name: &str) -> bool {
        self.tables
            .iter()
            .filter(|((s, _), _)| s == schema)
            .any(|(_, t)| t.indexes.iter().any(|i| i.name == name))
    }

    /// Run every statement in `sql`; all of them take effect or none do
    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let statements = parse(sql)?;
        let mut working = self.clone();
        let mut affected = 0;
        for statement in &statements {
            affected += working.apply(statement, params)?;
        }
        *self = working;
        Ok(affected)
    }

    fn apply(&mut self, statement: &Statement, params: &[DatabaseValue]) -> OrmResult<u64> {
        match statement {
            Statement::CreateTable(create) => self.create_table(create),
            Statement::CreateIndex(index) => self.create_index(index),
            Statement::AlterTable { name, operations, .. } => self.alter_table(name, operations),
            Statement::Drop { object_type: ObjectType::Table, if_exists, names, .. } => {
                self.drop_tables(names, *if_exists)
            }
            Statement::Drop { object_type: ObjectType::Index, if_exists, names, .. } => {
                self.drop_indexes(names, *if_exists)
            }
            Statement::Comment { object_type, object_name, comment, .. } => {
                self.comment(*object_type, object_name, comment.clone())
            }
            Statement::Insert(insert) => self.insert(insert, params),
            Statement::Delete(delete) => self.delete(delete, params),
            other => Err(unsupported(other)),
        }
    }

    fn create_table(&mut self, create: &CreateTable) -> OrmResult<u64> {
        let key = table_key(&create.name)?;
        if self.tables.contains_key(&key) {
            if create.if_not_exists {
                return Ok(0);
            }
            return Err(OrmError::execution(format!(
                "relation \"{}.{}\" already exists",
                key.0, key.1
            )));
        }

        let mut table = MemoryTable::default();
        for column in &create.columns {
            self.add_column(&key, &mut table, column)?;
        }
        for constraint in &create.constraints {
            self.add_constraint(&key, &mut table, constraint)?;
        }

        self.tables.insert(key, table);
        Ok(0)
    }

    fn add_column(&self, key: &TableKey, table: &mut MemoryTable, def: &ColumnDef) -> OrmResult<()> {
        let parsed = parse_column(def)?;
        let name = parsed.column.name.clone();
        let references = parsed.references;
        table.add_column(&key.1, parsed)?;
        if let Some((target, referred)) = references {
            self.require_referenced(key, table, target, referred)?;
            table.foreign_keys.push(format!("{}_{}_fkey", key.1, name));
        }
        Ok(())
    }

    fn add_constraint(&self, key: &TableKey, table: &mut MemoryTable, constraint: &TableConstraint) -> OrmResult<()> {
        match constraint {
            TableConstraint::PrimaryKey { name, columns, .. } => {
                table.set_primary_key(&key.1, name.as_ref().map(ident), idents(columns))
            }
            TableConstraint::Unique { name, columns, .. } => {
                let columns = idents(columns);
                table.require_columns(&columns)?;
                let name = name
                    .as_ref()
                    .map(ident)
                    .unwrap_or_else(|| format!("{}_{}_key", key.1, columns.join("_")));
                table.indexes.push(MemoryIndex {
                    name,
                    columns,
                    unique: true,
                    primary: false,
                });
                Ok(())
            }
            TableConstraint::ForeignKey { name, columns, foreign_table, referred_columns, .. } => {
                let columns = idents(columns);
                table.require_columns(&columns)?;
                self.require_referenced(key, table, foreign_table, referred_columns)?;
                let name = name
                    .as_ref()
                    .map(ident)
                    .unwrap_or_else(|| format!("{}_{}_fkey", key.1, columns.join("_")));
                table.foreign_keys.push(name);
                Ok(())
            }
            other => Err(unsupported(format!("constraint {}", other))),
        }
    }

    /// The referenced table may be the one being defined
    fn require_referenced(
        &self,
        key: &TableKey,
        table: &MemoryTable,
        target: &ObjectName,
        referred: &[Ident],
    ) -> OrmResult<()> {
        let target = table_key(target)?;
        let referred = idents(referred);
        if target == *key {
            table.require_columns(&referred)
        } else {
            self.table(&target.0, &target.1)?.require_columns(&referred)
        }
    }

    fn create_index(&mut self, index: &CreateIndex) -> OrmResult<u64> {
        let key = table_key(&index.table_name)?;
        let columns = index
            .columns
            .iter()
            .map(|column| match &column.expr {
                Expr::Identifier(name) => Ok(ident(name)),
                other => Err(unsupported(format!("index expression {}", other))),
            })
            .collect::<OrmResult<Vec<_>>>()?;
        let name = match index.name.as_ref().and_then(|name| name.0.last()) {
            Some(name) => ident(name),
            None => format!("{}_{}_idx", key.1, columns.join("_")),
        };

        if self.index_exists(&key.0, &name) {
            if index.if_not_exists {
                return Ok(0);
            }
            return Err(OrmError::execution(format!("relation \"{}\" already exists", name)));
        }
        let table = self.table_mut(&key)?;
        table.require_columns(&columns)?;
        table.indexes.push(MemoryIndex {
            name,
            columns,
            unique: index.unique,
            primary: false,
        });
        Ok(0)
    }

    fn alter_table(&mut self, name: &ObjectName, operations: &[AlterTableOperation]) -> OrmResult<u64> {
        let mut key = table_key(name)?;
        self.table(&key.0, &key.1)?;
        for operation in operations {
            key = self.alter_operation(key, operation)?;
        }
        Ok(0)
    }

    /// Apply one ALTER TABLE action; returns the table's key afterwards
    fn alter_operation(&mut self, key: TableKey, operation: &AlterTableOperation) -> OrmResult<TableKey> {
        match operation {
            AlterTableOperation::AddColumn { column_def, if_not_exists, .. } => {
                let mut table = self.table(&key.0, &key.1)?.clone();
                if *if_not_exists && table.column(&ident(&column_def.name)).is_ok() {
                    return Ok(key);
                }
                self.add_column(&key, &mut table, column_def)?;
                self.tables.insert(key.clone(), table);
            }
            AlterTableOperation::AddConstraint(constraint) => {
                let mut table = self.table(&key.0, &key.1)?.clone();
                self.add_constraint(&key, &mut table, constraint)?;
                self.tables.insert(key.clone(), table);
            }
            AlterTableOperation::DropColumn { column_name, if_exists, .. } => {
                let table = self.table_mut(&key)?;
                let name = ident(column_name);
                if !(*if_exists && table.column(&name).is_err()) {
                    table.drop_column(&name)?;
                }
            }
            AlterTableOperation::DropConstraint { name, if_exists, .. } => {
                self.table_mut(&key)?.drop_constraint(&ident(name), *if_exists)?;
            }
            AlterTableOperation::RenameColumn { old_column_name, new_column_name } => {
                self.table_mut(&key)?
                    .rename_column(&ident(old_column_name), &ident(new_column_name))?;
            }
            AlterTableOperation::RenameTable { table_name } => {
                let renamed = table_name
                    .0
                    .last()
                    .map(ident)
                    .ok_or_else(|| OrmError::execution("RENAME TO needs a name"))?;
                let target = (key.0.clone(), renamed);
                if self.tables.contains_key(&target) {
                    return Err(OrmError::execution(format!("relation \"{}\" already exists", target.1)));
                }
                if let Some(table) = self.tables.remove(&key) {
                    self.tables.insert(target.clone(), table);
                }
                return Ok(target);
            }
            AlterTableOperation::AlterColumn { column_name, op } => {
                let column = self.table_mut(&key)?.column_mut(&ident(column_name))?;
                alter_column(column, op)?;
            }
            other => return Err(unsupported(other)),
        }
        Ok(key)
    }

    fn drop_tables(&mut self, names: &[ObjectName], if_exists: bool) -> OrmResult<u64> {
        for name in names {
            let key = table_key(name)?;
            if self.tables.remove(&key).is_none() && !if_exists {
                return Err(undefined_table(&key));
            }
        }
        Ok(0)
    }

    fn drop_indexes(&mut self, names: &[ObjectName], if_exists: bool) -> OrmResult<u64> {
        for name in names {
            let (schema, index) = table_key(name)?;
            let table = self
                .tables
                .iter_mut()
                .filter(|((s, _), _)| *s == schema)
                .map(|(_, t)| t)
                .find(|t| t.indexes.iter().any(|i| i.name == index));
            match table {
                Some(table) => table.indexes.retain(|i| i.name != index),
                None if if_exists => {}
                None => return Err(OrmError::execution(format!("index \"{}\" does not exist", index))),
            }
        }
        Ok(0)
    }

    fn comment(&mut self, object_type: CommentObject, name: &ObjectName, comment: Option<String>) -> OrmResult<u64> {
        match object_type {
            CommentObject::Table => {
                let key = table_key(name)?;
                self.table_mut(&key)?.comment = comment;
            }
            CommentObject::Column => {
                let (column, relation) = name
                    .0
                    .split_last()
                    .ok_or_else(|| OrmError::execution("COMMENT ON COLUMN needs a name"))?;
                let key = table_key(&ObjectName(relation.to_vec()))?;
                self.table(&key.0, &key.1)?.column(&ident(column))?;
            }
        }
        Ok(0)
    }

    fn insert(&mut self, insert: &Insert, params: &[DatabaseValue]) -> OrmResult<u64> {
        let key = table_key(&insert.table_name)?;
        let rows = match insert.source.as_ref().map(|query| query.body.as_ref()) {
            Some(SetExpr::Values(values)) => &values.rows,
            _ => return Err(unsupported("INSERT without a VALUES list")),
        };

        let table = self.table_mut(&key)?;
        let columns = if insert.columns.is_empty() {
            table.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            idents(&insert.columns)
        };

        for exprs in rows {
            if exprs.len() != columns.len() {
                return Err(OrmError::execution("INSERT has more target columns than expressions"));
            }
            let mut record = HashMap::new();
            for (column, expr) in columns.iter().zip(exprs) {
                table.column(column)?;
                record.insert(column.clone(), literal(expr, params)?);
            }
            for column in &table.columns {
                let missing = record.get(&column.name).map_or(true, DatabaseValue::is_null);
                if missing && !column.nullable && column.default.is_none() {
                    return Err(OrmError::execution(format!(
                        "null value in column \"{}\" violates not-null constraint",
                        column.name
                    )));
                }
            }
            let keyed = table
                .primary_key
                .iter()
                .all(|c| record.get(c).is_some_and(|v| !v.is_null()));
            if !table.primary_key.is_empty() && keyed {
                let duplicate = table.rows.iter().any(|existing| {
                    table.primary_key.iter().all(|c| existing.get(c) == record.get(c))
                });
                if duplicate {
                    return Err(OrmError::execution(format!(
                        "duplicate key value violates unique constraint \"{}_pkey\"",
                        key.1
                    )));
                }
            }
            table.rows.push(record);
        }
        Ok(rows.len() as u64)
    }

    fn delete(&mut self, delete: &Delete, params: &[DatabaseValue]) -> OrmResult<u64> {
        let tables = match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
        };
        let key = relation_key(tables)?;
        let filter = predicate(delete.selection.as_ref(), params)?;

        let table = self.table_mut(&key)?;
        if let Some((column, _)) = &filter {
            table.column(column)?;
        }
        let before = table.rows.len();
        table.rows.retain(|row| !row_matches(row, &filter));
        Ok((before - table.rows.len()) as u64)
    }

    fn query(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<MemoryRow>> {
        match sql {
            queries::TABLE_EXISTS => {
                let exists = self.table(text_param(params, 0)?, text_param(params, 1)?).is_ok();
                Ok(present_row(exists))
            }
            queries::COLUMN_EXISTS => {
                let exists = self
                    .table(text_param(params, 0)?, text_param(params, 1)?)
                    .and_then(|t| t.column(text_param(params, 2)?).map(|_| ()))
                    .is_ok();
                Ok(present_row(exists))
            }
            queries::TABLE_COLUMNS => Ok(self
                .introspected(params)?
                .map(|t| t.columns.iter().map(column_row).collect())
                .unwrap_or_default()),
            queries::PRIMARY_KEY => Ok(self
                .introspected(params)?
                .map(|t| {
                    t.primary_key
                        .iter()
                        .map(|c| row(vec![("column_name", DatabaseValue::from(c.as_str()))]))
                        .collect()
                })
                .unwrap_or_default()),
            queries::INDEXES => Ok(self
                .introspected(params)?
                .map(|t| {
                    let mut indexes = t.indexes.clone();
                    indexes.sort_by(|a, b| a.name.cmp(&b.name));
                    indexes
                        .iter()
                        .flat_map(|index| {
                            index.columns.iter().map(move |column| {
                                row(vec![
                                    ("index_name", DatabaseValue::from(index.name.as_str())),
                                    ("column_name", DatabaseValue::from(column.as_str())),
                                    ("is_unique", DatabaseValue::Bool(index.unique)),
                                    ("is_primary", DatabaseValue::Bool(index.primary)),
                                ])
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()),
            queries::TABLE_COMMENT => Ok(self
                .introspected(params)?
                .map(|t| vec![row(vec![("comment", DatabaseValue::from(t.comment.clone()))])])
                .unwrap_or_default()),
            _ => self.select(sql, params),
        }
    }

    fn introspected(&self, params: &[DatabaseValue]) -> OrmResult<Option<&MemoryTable>> {
        Ok(self.table(text_param(params, 0)?, text_param(params, 1)?).ok())
    }

    /// `SELECT "a", "b" FROM "schema"."table" [WHERE "c" = $1]`
    fn select(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<MemoryRow>> {
        let statements = parse(sql)?;
        let select = match statements.as_slice() {
            [Statement::Query(query)] => match query.body.as_ref() {
                SetExpr::Select(select) => select,
                other => return Err(unsupported(other)),
            },
            _ => return Err(unsupported(format!("query {}", sql))),
        };

        let columns = select
            .projection
            .iter()
            .map(|item| match item {
                SelectItem::UnnamedExpr(Expr::Identifier(name)) => Ok(ident(name)),
                other => Err(unsupported(format!("projection {}", other))),
            })
            .collect::<OrmResult<Vec<_>>>()?;
        let key = relation_key(&select.from)?;
        let filter = predicate(select.selection.as_ref(), params)?;

        let table = self.table(&key.0, &key.1)?;
        table.require_columns(&columns)?;
        Ok(table
            .rows
            .iter()
            .filter(|record| row_matches(record, &filter))
            .map(|record| MemoryRow {
                values: columns
                    .iter()
                    .map(|c| (c.clone(), record.get(c).cloned().unwrap_or(DatabaseValue::Null)))
                    .collect(),
            })
            .collect())
    }
}

fn present_row(exists: bool) -> Vec<MemoryRow> {
    if exists {
        vec![row(vec![("present", DatabaseValue::Int32(1))])]
    } else {
        Vec::new()
    }
}

fn column_row(column: &MemoryColumn) -> MemoryRow {
    let (length, precision, scale) = match &column.column_type {
        ColumnType::Char(len) | ColumnType::Varchar(len) => (*len, None, None),
        ColumnType::SmallInt | ColumnType::SmallSerial => (None, Some(16), Some(0)),
        ColumnType::Integer | ColumnType::Serial => (None, Some(32), Some(0)),
        ColumnType::BigInt | ColumnType::BigSerial => (None, Some(64), Some(0)),
        ColumnType::Decimal { precision, scale } => (None, Some(*precision), Some(*scale)),
        _ => (None, None, None),
    };
    let as_int = |v: Option<u32>| DatabaseValue::from(v.and_then(|v| i32::try_from(v).ok()));

    row(vec![
        ("column_name", DatabaseValue::from(column.name.as_str())),
        ("udt_name", DatabaseValue::from(column.column_type.udt_name())),
        ("is_nullable", DatabaseValue::from(if column.nullable { "YES" } else { "NO" })),
        ("column_default", DatabaseValue::from(column.default.clone())),
        ("character_maximum_length", as_int(length)),
        ("numeric_precision", as_int(precision)),
        ("numeric_scale", as_int(scale)),
    ])
}

fn text_param(params: &[DatabaseValue], index: usize) -> OrmResult<&str> {
    match params.get(index) {
        Some(DatabaseValue::String(s)) => Ok(s.as_str()),
        _ => Err(OrmError::execution(format!("expected text parameter ${}", index + 1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseRowExt;

    async fn column_default(db: &MemoryDatabase, table: &str, column: &str) -> Option<String> {
        let state = db.state.lock().await;
        let table = state.catalog.table(DEFAULT_SCHEMA, table).unwrap();
        table.column(column).unwrap().default.clone()
    }

    #[tokio::test]
    async fn test_commit_publishes_and_rollback_discards() {
        let db = MemoryDatabase::new();

        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE \"public\".\"kept\" (\n    \"id\" SERIAL PRIMARY KEY\n)", &[])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE \"public\".\"discarded\" (\"id\" INTEGER)", &[])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(db.table_names("public").await, vec!["kept".to_string()]);
        assert_eq!(db.committed_statements().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_statements_are_rejected() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();

        let err = tx.execute("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(&err, OrmError::Execution(m) if m.starts_with("syntax error")), "{}", err);

        tx.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        let err = tx.execute("TRUNCATE t", &[]).await.unwrap_err();
        assert!(matches!(&err, OrmError::Execution(m) if m.contains("not supported")), "{}", err);

        assert!(tx.execute("CREATE TABLE g (x geometry)", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_plain_sql_and_ledger_shapes() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE users (id SERIAL PRIMARY KEY, name VARCHAR(100) NOT NULL);", &[])
            .await
            .unwrap();
        tx.execute(
            "INSERT INTO \"public\".\"users\" (\"name\") VALUES ($1)",
            &[DatabaseValue::from("ada")],
        )
        .await
        .unwrap();
        tx.execute("INSERT INTO users (name) VALUES ('grace')", &[]).await.unwrap();

        let rows = tx.fetch_all("SELECT \"id\", \"name\" FROM \"public\".\"users\"", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_string("name").unwrap(), "ada");

        let rows = tx
            .fetch_all("SELECT \"name\" FROM \"public\".\"users\" WHERE \"name\" = $1", &[DatabaseValue::from("grace")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let removed = tx
            .execute("DELETE FROM \"public\".\"users\" WHERE \"name\" = $1", &[DatabaseValue::from("ada")])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let err = tx.execute("INSERT INTO users (id) VALUES (7)", &[]).await.unwrap_err();
        assert_eq!(
            err,
            OrmError::execution("null value in column \"name\" violates not-null constraint")
        );
    }

    #[tokio::test]
    async fn test_injected_failures_and_unavailable_server() {
        let db = MemoryDatabase::new();
        db.fail_on("boom").await;
        let mut tx = db.begin_transaction().await.unwrap();
        assert!(tx.execute("CREATE TABLE boom (id INTEGER)", &[]).await.is_err());

        db.set_unavailable(true).await;
        assert!(matches!(
            db.begin_transaction().await.err(),
            Some(OrmError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_quoted_defaults_survive_commas_and_quotes() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute(
            "CREATE TABLE notes (\"id\" SERIAL PRIMARY KEY, \"body\" TEXT NOT NULL DEFAULT 'say \"hi\", then leave', \"price\" NUMERIC(10, 2))",
            &[],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.column_names("public", "notes").await, vec!["id", "body", "price"]);
        assert_eq!(
            column_default(&db, "notes", "body").await.as_deref(),
            Some("'say \"hi\", then leave'")
        );
        assert_eq!(
            column_default(&db, "notes", "id").await.as_deref(),
            Some("nextval('notes_id_seq'::regclass)")
        );
    }

    #[tokio::test]
    async fn test_failed_alter_action_leaves_table_untouched() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE accounts (id INTEGER PRIMARY KEY)", &[]).await.unwrap();

        let err = tx
            .execute(
                "ALTER TABLE accounts ADD COLUMN email TEXT, RENAME COLUMN missing TO other",
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err, OrmError::execution("column \"missing\" does not exist"));

        tx.execute("ALTER TABLE accounts ADD COLUMN email TEXT UNIQUE", &[]).await.unwrap();
        tx.execute("ALTER TABLE accounts RENAME TO members", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.table_names("public").await, vec!["members".to_string()]);
        assert_eq!(db.column_names("public", "members").await, vec!["id", "email"]);
    }

    #[tokio::test]
    async fn test_constraints_indexes_and_comments() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE teams (id INTEGER PRIMARY KEY)", &[]).await.unwrap();
        tx.execute(
            "CREATE TABLE players (id INTEGER, team_id INTEGER, CONSTRAINT players_team_fk FOREIGN KEY (team_id) REFERENCES teams (id))",
            &[],
        )
        .await
        .unwrap();
        tx.execute("CREATE UNIQUE INDEX players_team_idx ON players (team_id)", &[]).await.unwrap();
        tx.execute("COMMENT ON TABLE players IS 'roster'", &[]).await.unwrap();
        tx.execute("COMMENT ON COLUMN players.team_id IS 'owning team'", &[]).await.unwrap();

        assert!(tx.execute("COMMENT ON COLUMN players.nope IS 'x'", &[]).await.is_err());
        assert!(tx
            .execute("CREATE TABLE bad (t INTEGER REFERENCES nowhere (id))", &[])
            .await
            .is_err());

        tx.execute("ALTER TABLE players DROP CONSTRAINT players_team_fk", &[]).await.unwrap();
        tx.execute("DROP INDEX players_team_idx", &[]).await.unwrap();
        tx.execute("DROP INDEX IF EXISTS players_team_idx", &[]).await.unwrap();
        tx.execute("DROP TABLE players; DROP TABLE teams", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(db.table_names("public").await.is_empty());
    }
}
