//! Core Database Backend Traits
//!
//! The schema builder, the introspector and the migration ledger talk to the
//! database only through these traits. A pool hands out transactions; every
//! changeset runs inside exactly one of them.

use std::collections::HashMap;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use crate::error::{OrmError, OrmResult};

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Execute a statement within the transaction and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row within the transaction
    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to HashMap
    fn to_map(&self) -> OrmResult<HashMap<String, DatabaseValue>> {
        let mut map = HashMap::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?);
        }
        Ok(map)
    }
}

/// Typed accessors over [`DatabaseRow`] used by catalog and ledger readers
pub trait DatabaseRowExt {
    /// Read a non-null text column
    fn get_string(&self, column: &str) -> OrmResult<String>;

    /// Read a nullable text column
    fn get_optional_string(&self, column: &str) -> OrmResult<Option<String>>;

    /// Read a non-null integer column
    fn get_i64(&self, column: &str) -> OrmResult<i64>;

    /// Read a nullable integer column
    fn get_optional_i64(&self, column: &str) -> OrmResult<Option<i64>>;

    /// Read a boolean column
    fn get_bool(&self, column: &str) -> OrmResult<bool>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get_string(&self, column: &str) -> OrmResult<String> {
        self.get_optional_string(column)?
            .ok_or_else(|| OrmError::execution(format!("Column '{}' is unexpectedly NULL", column)))
    }

    fn get_optional_string(&self, column: &str) -> OrmResult<Option<String>> {
        match self.get_by_name(column)? {
            DatabaseValue::Null => Ok(None),
            DatabaseValue::String(s) => Ok(Some(s)),
            other => Err(OrmError::execution(format!(
                "Column '{}' holds {:?}, expected text",
                column, other
            ))),
        }
    }

    fn get_i64(&self, column: &str) -> OrmResult<i64> {
        self.get_optional_i64(column)?
            .ok_or_else(|| OrmError::execution(format!("Column '{}' is unexpectedly NULL", column)))
    }

    fn get_optional_i64(&self, column: &str) -> OrmResult<Option<i64>> {
        match self.get_by_name(column)? {
            DatabaseValue::Null => Ok(None),
            DatabaseValue::Int32(i) => Ok(Some(i64::from(i))),
            DatabaseValue::Int64(i) => Ok(Some(i)),
            other => Err(OrmError::execution(format!(
                "Column '{}' holds {:?}, expected integer",
                column, other
            ))),
        }
    }

    fn get_bool(&self, column: &str) -> OrmResult<bool> {
        match self.get_by_name(column)? {
            DatabaseValue::Bool(b) => Ok(b),
            other => Err(OrmError::execution(format!(
                "Column '{}' holds {:?}, expected boolean",
                column, other
            ))),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        // A migration run only ever holds one connection at a time.
        Self {
            max_connections: 2,
            min_connections: 1,
            acquire_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRow(Vec<(&'static str, DatabaseValue)>);

    impl DatabaseRow for StaticRow {
        fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
            self.0
                .get(index)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| OrmError::execution("index out of range"))
        }

        fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
            self.0
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| OrmError::execution(format!("Column '{}' not found", name)))
        }

        fn column_count(&self) -> usize {
            self.0.len()
        }

        fn column_names(&self) -> Vec<String> {
            self.0.iter().map(|(n, _)| n.to_string()).collect()
        }
    }

    #[test]
    fn test_typed_accessors() {
        let row = StaticRow(vec![
            ("version", DatabaseValue::from("20240101000000_init")),
            ("batch", DatabaseValue::Int32(3)),
            ("comment", DatabaseValue::Null),
            ("unique", DatabaseValue::Bool(true)),
        ]);

        assert_eq!(row.get_string("version").unwrap(), "20240101000000_init");
        assert_eq!(row.get_i64("batch").unwrap(), 3);
        assert_eq!(row.get_optional_string("comment").unwrap(), None);
        assert!(row.get_bool("unique").unwrap());
        assert!(row.get_string("comment").is_err());
        assert!(row.get_i64("version").is_err());
        assert_eq!(row.to_map().unwrap().len(), 4);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(DatabaseValue::from(None::<i32>), DatabaseValue::Null);
        assert_eq!(DatabaseValue::from(Some(7)), DatabaseValue::Int32(7));
        assert!(DatabaseValue::Null.is_null());
    }
}
