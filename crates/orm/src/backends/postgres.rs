//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the database
//! backend traits using sqlx as the underlying database driver.

use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row, TypeInfo, ValueRef};
use keel_core::config::{ConfigValidator, UrlValidator};
use crate::error::{OrmError, OrmResult};
use super::core::*;

/// PostgreSQL connection pool implementation
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    /// Wrap an existing sqlx pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> OrmResult<Self> {
        UrlValidator::default().validate(database_url)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(database_url)
            .await
            .map_err(|e| OrmError::configuration(format!("Failed to create PostgreSQL pool: {}", e)))?;

        tracing::debug!("PostgreSQL pool connected (max connections: {})", config.max_connections);
        Ok(Self::new(pool))
    }

    /// Get the underlying sqlx pool
    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::configuration(format!("Failed to start transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::execution("Transaction already completed"))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.active()?;

        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|e| OrmError::execution(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.active()?;

        let rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| OrmError::execution(format!("Query fetch failed: {}", e)))?;

        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let tx = self.active()?;

        let row = query
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| OrmError::execution(format!("Query fetch failed: {}", e)))?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.take().ok_or_else(|| OrmError::execution("Transaction already completed"))?;

        tx.commit()
            .await
            .map_err(|e| OrmError::execution(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.take().ok_or_else(|| OrmError::execution("Transaction already completed"))?;

        tx.rollback()
            .await
            .map_err(|e| OrmError::execution(format!("Transaction rollback failed: {}", e)))
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| OrmError::execution(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> OrmResult<PgQuery<'q>> {
    for param in params {
        query = bind_database_value(query, param);
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::execution(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let read_error = |e: sqlx::Error| {
        OrmError::execution(format!("Failed to decode {} value in column {}: {}", type_name, index, e))
    };

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(read_error)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index).map_err(read_error)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(read_error)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(read_error)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index).map_err(read_error)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(read_error)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(read_error)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index).map_err(read_error)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index).map_err(read_error)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get(index).map_err(read_error)?),
        // Catalog queries cast identifiers and type names to text
        _ => DatabaseValue::String(row.try_get(index).map_err(read_error)?),
    };

    Ok(value)
}
