//! Catalog introspection
//!
//! Reads the live shape of a table from `information_schema` and `pg_catalog`.
//! All queries run inside the caller's transaction, so a changeset sees its own
//! uncommitted DDL.

use serde::Serialize;
use tracing::debug;

use crate::backends::{DatabaseRowExt, DatabaseTransaction, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use super::column::ColumnType;
use super::table::TableBuilder;

pub(crate) mod queries {
    pub const TABLE_EXISTS: &str = "SELECT 1 AS present FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2";

    pub const COLUMN_EXISTS: &str = "SELECT 1 AS present FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 AND column_name = $3";

    pub const TABLE_COLUMNS: &str = "SELECT column_name::text AS column_name, \
         udt_name::text AS udt_name, \
         is_nullable::text AS is_nullable, \
         column_default::text AS column_default, \
         character_maximum_length::int4 AS character_maximum_length, \
         numeric_precision::int4 AS numeric_precision, \
         numeric_scale::int4 AS numeric_scale \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position";

    pub const PRIMARY_KEY: &str = "SELECT kcu.column_name::text AS column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
         ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
         ORDER BY kcu.ordinal_position";

    pub const INDEXES: &str = "SELECT ic.relname::text AS index_name, \
         a.attname::text AS column_name, \
         ix.indisunique AS is_unique, \
         ix.indisprimary AS is_primary \
         FROM pg_index ix \
         JOIN pg_class t ON t.oid = ix.indrelid \
         JOIN pg_class ic ON ic.oid = ix.indexrelid \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON TRUE \
         JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
         WHERE n.nspname = $1 AND t.relname = $2 \
         ORDER BY ic.relname, k.ord";

    pub const TABLE_COMMENT: &str = "SELECT obj_description(c.oid, 'pg_class')::text AS comment \
         FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relname = $2";
}

/// Live shape of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnShape {
    pub name: String,
    /// Catalog type name, e.g. `int8`, `varchar`, `_text`
    pub udt_name: String,
    /// Resolved abstract type; `None` for types the builder cannot express
    pub column_type: Option<ColumnType>,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Live shape of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexShape {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// Live shape of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableShape {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnShape>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexShape>,
    pub comment: Option<String>,
}

impl TableShape {
    pub fn column(&self, name: &str) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Rebuild a create blueprint equivalent to this table
    pub fn to_blueprint(&self) -> OrmResult<TableBuilder> {
        let mut table = TableBuilder::create(&self.name);
        let single_primary = match self.primary_key.as_slice() {
            [column] => Some(column.as_str()),
            _ => None,
        };

        for shape in &self.columns {
            let column_type = shape.column_type.clone().ok_or_else(|| {
                OrmError::validation(format!(
                    "Column '{}' has catalog type '{}' with no builder equivalent",
                    shape.name, shape.udt_name
                ))
            })?;
            let serial = column_type.is_serial();
            let column = table.column(&shape.name, column_type);
            if !shape.nullable {
                column.not_null();
            }
            if let Some(default) = shape.default.as_ref().filter(|_| !serial) {
                column.default_raw(default.clone());
            }
            if single_primary == Some(shape.name.as_str()) {
                column.primary();
            }
        }

        if self.primary_key.len() > 1 {
            let columns: Vec<&str> = self.primary_key.iter().map(String::as_str).collect();
            table.primary(&columns);
        }

        for index in self.indexes.iter().filter(|i| !i.primary) {
            let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
            table.index_named(&index.name, &columns, index.unique);
        }

        if let Some(comment) = &self.comment {
            table.comment(comment.clone());
        }

        Ok(table)
    }
}

/// Reads catalog metadata for tables in one schema namespace
#[derive(Debug, Clone)]
pub struct Introspector {
    schema: String,
}

impl Introspector {
    pub fn new(schema: impl Into<String>) -> Self {
        Self { schema: schema.into() }
    }

    pub async fn has_table(&self, tx: &mut dyn DatabaseTransaction, table: &str) -> OrmResult<bool> {
        let params = [DatabaseValue::from(self.schema.as_str()), DatabaseValue::from(table)];
        let row = tx.fetch_optional(queries::TABLE_EXISTS, &params).await?;
        Ok(row.is_some())
    }

    pub async fn has_column(&self, tx: &mut dyn DatabaseTransaction, table: &str, column: &str) -> OrmResult<bool> {
        let params = [
            DatabaseValue::from(self.schema.as_str()),
            DatabaseValue::from(table),
            DatabaseValue::from(column),
        ];
        let row = tx.fetch_optional(queries::COLUMN_EXISTS, &params).await?;
        Ok(row.is_some())
    }

    /// Full shape of `table`, or `None` when it does not exist
    pub async fn describe_table(&self, tx: &mut dyn DatabaseTransaction, table: &str) -> OrmResult<Option<TableShape>> {
        if !self.has_table(tx, table).await? {
            return Ok(None);
        }
        debug!("Introspecting table {}.{}", self.schema, table);

        let params = [DatabaseValue::from(self.schema.as_str()), DatabaseValue::from(table)];

        let mut columns = Vec::new();
        for row in tx.fetch_all(queries::TABLE_COLUMNS, &params).await? {
            let udt_name = row.get_string("udt_name")?;
            let default = row.get_optional_string("column_default")?;
            let column_type = resolve_column_type(
                &udt_name,
                to_size(row.get_optional_i64("character_maximum_length")?),
                to_size(row.get_optional_i64("numeric_precision")?),
                to_size(row.get_optional_i64("numeric_scale")?),
                default.as_deref(),
            );
            columns.push(ColumnShape {
                name: row.get_string("column_name")?,
                udt_name,
                column_type,
                nullable: row.get_string("is_nullable")? == "YES",
                default,
            });
        }

        let mut primary_key = Vec::new();
        for row in tx.fetch_all(queries::PRIMARY_KEY, &params).await? {
            primary_key.push(row.get_string("column_name")?);
        }

        let mut indexes: Vec<IndexShape> = Vec::new();
        for row in tx.fetch_all(queries::INDEXES, &params).await? {
            let name = row.get_string("index_name")?;
            let column = row.get_string("column_name")?;
            match indexes.iter_mut().find(|index| index.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(IndexShape {
                    name,
                    columns: vec![column],
                    unique: row.get_bool("is_unique")?,
                    primary: row.get_bool("is_primary")?,
                }),
            }
        }

        let comment = match tx.fetch_optional(queries::TABLE_COMMENT, &params).await? {
            Some(row) => row.get_optional_string("comment")?,
            None => None,
        };

        Ok(Some(TableShape {
            schema: self.schema.clone(),
            name: table.to_string(),
            columns,
            primary_key,
            indexes,
            comment,
        }))
    }
}

fn to_size(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

/// Map catalog metadata back onto a [`ColumnType`]
fn resolve_column_type(
    udt_name: &str,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
    default: Option<&str>,
) -> Option<ColumnType> {
    if let Some(element) = udt_name.strip_prefix('_') {
        let element = resolve_column_type(element, None, None, None, None)?;
        return Some(ColumnType::Array(Box::new(element)));
    }

    let column_type = ColumnType::from_name(udt_name, length, precision, scale).ok()?;
    let sequence_backed = default.is_some_and(|d| d.starts_with("nextval("));

    Some(match column_type {
        ColumnType::SmallInt if sequence_backed => ColumnType::SmallSerial,
        ColumnType::Integer if sequence_backed => ColumnType::Serial,
        ColumnType::BigInt if sequence_backed => ColumnType::BigSerial,
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_column_types() {
        assert_eq!(
            resolve_column_type("int8", None, Some(64), Some(0), Some("nextval('users_id_seq'::regclass)")),
            Some(ColumnType::BigSerial)
        );
        assert_eq!(resolve_column_type("int4", None, Some(32), Some(0), None), Some(ColumnType::Integer));
        assert_eq!(
            resolve_column_type("varchar", Some(255), None, None, None),
            Some(ColumnType::Varchar(Some(255)))
        );
        assert_eq!(
            resolve_column_type("numeric", None, Some(10), Some(2), None),
            Some(ColumnType::Decimal { precision: 10, scale: 2 })
        );
        assert_eq!(
            resolve_column_type("_text", None, None, None, None),
            Some(ColumnType::Array(Box::new(ColumnType::Text)))
        );
        assert_eq!(resolve_column_type("tsvector", None, None, None, None), None);
    }

    #[test]
    fn test_shape_to_blueprint() {
        let shape = TableShape {
            schema: "public".to_string(),
            name: "users".to_string(),
            columns: vec![
                ColumnShape {
                    name: "id".to_string(),
                    udt_name: "int8".to_string(),
                    column_type: Some(ColumnType::BigSerial),
                    nullable: false,
                    default: Some("nextval('users_id_seq'::regclass)".to_string()),
                },
                ColumnShape {
                    name: "email".to_string(),
                    udt_name: "varchar".to_string(),
                    column_type: Some(ColumnType::Varchar(Some(255))),
                    nullable: false,
                    default: None,
                },
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![
                IndexShape {
                    name: "users_pkey".to_string(),
                    columns: vec!["id".to_string()],
                    unique: true,
                    primary: true,
                },
                IndexShape {
                    name: "users_email_key".to_string(),
                    columns: vec!["email".to_string()],
                    unique: true,
                    primary: false,
                },
            ],
            comment: Some("Accounts".to_string()),
        };

        let blueprint = shape.to_blueprint().unwrap();
        let columns = blueprint.columns();
        assert_eq!(columns.len(), 2);
        assert!(columns[0].is_primary());
        assert!(columns[0].default_value().is_none());
        assert!(!columns[1].is_nullable());
        assert_eq!(blueprint.indexes().len(), 1);
        assert_eq!(blueprint.indexes()[0].name.as_deref(), Some("users_email_key"));
        assert!(shape.has_column("email"));
        assert!(!shape.has_column("phone"));
    }

    #[test]
    fn test_unsupported_type_blocks_blueprint() {
        let shape = TableShape {
            schema: "public".to_string(),
            name: "documents".to_string(),
            columns: vec![ColumnShape {
                name: "search".to_string(),
                udt_name: "tsvector".to_string(),
                column_type: None,
                nullable: true,
                default: None,
            }],
            primary_key: Vec::new(),
            indexes: Vec::new(),
            comment: None,
        };
        assert!(shape.to_blueprint().unwrap_err().is_validation());
    }
}
