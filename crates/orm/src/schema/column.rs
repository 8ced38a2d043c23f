//! Column descriptors
//!
//! A [`ColumnDescriptor`] is the dialect-independent description of one column:
//! its type (fixed at construction) plus chained modifiers for nullability,
//! default, primary key, uniqueness and comment.

use std::fmt;
use std::str::FromStr;
use serde::Serialize;

use crate::error::{OrmError, OrmResult};
use super::compiler::{quote_identifier, quote_literal};

/// Largest precision PostgreSQL accepts for NUMERIC
const MAX_NUMERIC_PRECISION: u32 = 1000;

/// Abstract column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    SmallSerial,
    Serial,
    BigSerial,
    Real,
    Double,
    Decimal { precision: u32, scale: u32 },
    Char(Option<u32>),
    Varchar(Option<u32>),
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Binary,
    Json,
    Jsonb,
    Inet,
    Cidr,
    MacAddr,
    Uuid,
    Array(Box<ColumnType>),
}

impl ColumnType {
    /// Resolve a type from its name and optional size parameters.
    ///
    /// Accepts SQL spellings (`varchar`, `double precision`, `timestamptz`) as
    /// well as PostgreSQL catalog names (`int4`, `bpchar`, `float8`). Names
    /// ending in `[]` resolve to arrays.
    pub fn from_name(
        name: &str,
        size: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> OrmResult<Self> {
        let normalized = name.trim().to_lowercase();

        if let Some(element) = normalized.strip_suffix("[]") {
            let element = Self::from_name(element, size, precision, scale)?;
            return Ok(ColumnType::Array(Box::new(element)));
        }

        let column_type = match normalized.as_str() {
            "smallint" | "int2" => ColumnType::SmallInt,
            "integer" | "int" | "int4" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "smallserial" | "serial2" => ColumnType::SmallSerial,
            "serial" | "serial4" => ColumnType::Serial,
            "bigserial" | "serial8" => ColumnType::BigSerial,
            "real" | "float4" => ColumnType::Real,
            "double" | "double precision" | "float8" => ColumnType::Double,
            "decimal" | "numeric" => {
                let precision = precision.ok_or_else(|| {
                    OrmError::validation(format!("Type '{}' requires a precision", name))
                })?;
                ColumnType::Decimal { precision, scale: scale.unwrap_or(0) }
            }
            "char" | "character" | "bpchar" => ColumnType::Char(size),
            "varchar" | "character varying" | "string" => ColumnType::Varchar(size),
            "text" => ColumnType::Text,
            "boolean" | "bool" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "time" | "time without time zone" => ColumnType::Time,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::TimestampTz,
            "interval" => ColumnType::Interval,
            "binary" | "bytea" => ColumnType::Binary,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            "inet" => ColumnType::Inet,
            "cidr" => ColumnType::Cidr,
            "macaddr" => ColumnType::MacAddr,
            "uuid" => ColumnType::Uuid,
            _ => return Err(OrmError::validation(format!("Unsupported column type '{}'", name))),
        };

        column_type.validate()?;
        Ok(column_type)
    }

    /// Check size and precision parameters
    pub fn validate(&self) -> OrmResult<()> {
        match self {
            ColumnType::Char(Some(0)) | ColumnType::Varchar(Some(0)) => Err(OrmError::validation(
                "Bounded text columns require a positive length",
            )),
            ColumnType::Decimal { precision, scale } => {
                if *precision == 0 || *precision > MAX_NUMERIC_PRECISION {
                    return Err(OrmError::validation(format!(
                        "Decimal precision must be between 1 and {}, got {}",
                        MAX_NUMERIC_PRECISION, precision
                    )));
                }
                if scale > precision {
                    return Err(OrmError::validation(format!(
                        "Decimal scale {} exceeds precision {}",
                        scale, precision
                    )));
                }
                Ok(())
            }
            ColumnType::Array(element) => {
                if element.is_serial() {
                    return Err(OrmError::validation("Arrays of serial types are not supported"));
                }
                element.validate()
            }
            _ => Ok(()),
        }
    }

    /// Whether the type is an auto-incrementing integer
    pub fn is_serial(&self) -> bool {
        matches!(self, ColumnType::SmallSerial | ColumnType::Serial | ColumnType::BigSerial)
    }

    /// PostgreSQL spelling of the type
    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::SmallSerial => "SMALLSERIAL".to_string(),
            ColumnType::Serial => "SERIAL".to_string(),
            ColumnType::BigSerial => "BIGSERIAL".to_string(),
            ColumnType::Real => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
            ColumnType::Char(Some(len)) => format!("CHAR({})", len),
            ColumnType::Char(None) => "CHAR".to_string(),
            ColumnType::Varchar(Some(len)) => format!("VARCHAR({})", len),
            ColumnType::Varchar(None) => "VARCHAR".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Interval => "INTERVAL".to_string(),
            ColumnType::Binary => "BYTEA".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Jsonb => "JSONB".to_string(),
            ColumnType::Inet => "INET".to_string(),
            ColumnType::Cidr => "CIDR".to_string(),
            ColumnType::MacAddr => "MACADDR".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Array(element) => format!("{}[]", element.to_sql()),
        }
    }

    /// Name PostgreSQL reports in `information_schema.columns.udt_name`
    pub fn udt_name(&self) -> String {
        match self {
            ColumnType::SmallInt | ColumnType::SmallSerial => "int2".to_string(),
            ColumnType::Integer | ColumnType::Serial => "int4".to_string(),
            ColumnType::BigInt | ColumnType::BigSerial => "int8".to_string(),
            ColumnType::Real => "float4".to_string(),
            ColumnType::Double => "float8".to_string(),
            ColumnType::Decimal { .. } => "numeric".to_string(),
            ColumnType::Char(_) => "bpchar".to_string(),
            ColumnType::Varchar(_) => "varchar".to_string(),
            ColumnType::Text => "text".to_string(),
            ColumnType::Boolean => "bool".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time => "time".to_string(),
            ColumnType::Timestamp => "timestamp".to_string(),
            ColumnType::TimestampTz => "timestamptz".to_string(),
            ColumnType::Interval => "interval".to_string(),
            ColumnType::Binary => "bytea".to_string(),
            ColumnType::Json => "json".to_string(),
            ColumnType::Jsonb => "jsonb".to_string(),
            ColumnType::Inet => "inet".to_string(),
            ColumnType::Cidr => "cidr".to_string(),
            ColumnType::MacAddr => "macaddr".to_string(),
            ColumnType::Uuid => "uuid".to_string(),
            ColumnType::Array(element) => format!("_{}", element.udt_name()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Parses SQL type text such as `varchar(255)`, `numeric(10, 2)` or `integer[]`
impl FromStr for ColumnType {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();

        if let Some(element) = text.strip_suffix("[]") {
            return Ok(ColumnType::Array(Box::new(element.parse()?)));
        }

        let Some(open) = text.find('(') else {
            return ColumnType::from_name(text, None, None, None);
        };

        let close = text
            .rfind(')')
            .filter(|close| *close > open)
            .ok_or_else(|| OrmError::validation(format!("Malformed column type '{}'", s)))?;
        let base = &text[..open];
        let params = text[open + 1..close]
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .map_err(|_| OrmError::validation(format!("Invalid size parameter in '{}'", s)))
            })
            .collect::<OrmResult<Vec<u32>>>()?;

        match params.as_slice() {
            [size] if is_numeric_name(base) => ColumnType::from_name(base, None, Some(*size), Some(0)),
            [size] => ColumnType::from_name(base, Some(*size), None, None),
            [precision, scale] => ColumnType::from_name(base, None, Some(*precision), Some(*scale)),
            _ => Err(OrmError::validation(format!("Too many type parameters in '{}'", s))),
        }
    }
}

fn is_numeric_name(name: &str) -> bool {
    matches!(name.trim().to_lowercase().as_str(), "decimal" | "numeric")
}

/// Column default: a literal that gets quoted, or a raw SQL expression
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Inserted verbatim, e.g. `CURRENT_TIMESTAMP` or `gen_random_uuid()`
    Raw(String),
}

impl DefaultValue {
    /// Render the default as SQL
    pub fn to_sql(&self) -> OrmResult<String> {
        match self {
            DefaultValue::Null => Ok("NULL".to_string()),
            DefaultValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            DefaultValue::Integer(i) => Ok(i.to_string()),
            DefaultValue::Float(f) if f.is_finite() => Ok(f.to_string()),
            DefaultValue::Float(f) => Err(OrmError::validation(format!("Default {} is not a finite number", f))),
            DefaultValue::Text(s) => Ok(quote_literal(s)),
            DefaultValue::Raw(expr) if expr.trim().is_empty() => {
                Err(OrmError::validation("Raw default expression is empty"))
            }
            DefaultValue::Raw(expr) => Ok(expr.clone()),
        }
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Bool(value)
    }
}

impl From<i32> for DefaultValue {
    fn from(value: i32) -> Self {
        DefaultValue::Integer(i64::from(value))
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Integer(value)
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        DefaultValue::Float(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Text(value.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        DefaultValue::Text(value)
    }
}

/// Specification of a single column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    default: Option<DefaultValue>,
    primary: bool,
    unique: bool,
    comment: Option<String>,
}

impl ColumnDescriptor {
    /// Create a nullable column without constraints
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary: false,
            unique: false,
            comment: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn comment_text(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Allow NULL values (the default)
    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    /// Reject NULL values
    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    /// Set a literal default
    pub fn default(&mut self, value: impl Into<DefaultValue>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    /// Set a raw SQL default expression
    pub fn default_raw(&mut self, expression: impl Into<String>) -> &mut Self {
        self.default = Some(DefaultValue::Raw(expression.into()));
        self
    }

    /// Mark the column as (part of) the primary key; implies NOT NULL
    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// Add a single-column unique constraint
    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    /// Attach a column comment
    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.comment = Some(text.into());
        self
    }

    /// Check the name, type and default of the column
    pub fn validate(&self) -> OrmResult<()> {
        super::compiler::validate_identifier(&self.name)?;
        self.column_type.validate()?;
        if let Some(default) = &self.default {
            if self.column_type.is_serial() {
                return Err(OrmError::validation(format!(
                    "Serial column '{}' cannot declare a default",
                    self.name
                )));
            }
            default.to_sql()?;
        }
        Ok(())
    }

    /// Compile the column definition, with an inline primary key when flagged
    pub fn to_sql(&self) -> OrmResult<String> {
        self.render(true)
    }

    pub(crate) fn render(&self, inline_primary: bool) -> OrmResult<String> {
        self.validate()?;

        let mut sql = format!("{} {}", quote_identifier(&self.name)?, self.column_type.to_sql());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql()?);
        }
        if self.primary && inline_primary {
            sql.push_str(" PRIMARY KEY");
        } else if self.unique {
            sql.push_str(" UNIQUE");
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping() {
        assert_eq!(ColumnType::BigSerial.to_sql(), "BIGSERIAL");
        assert_eq!(ColumnType::Varchar(Some(255)).to_sql(), "VARCHAR(255)");
        assert_eq!(ColumnType::Decimal { precision: 10, scale: 2 }.to_sql(), "NUMERIC(10, 2)");
        assert_eq!(ColumnType::Double.to_sql(), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Array(Box::new(ColumnType::Text)).to_sql(), "TEXT[]");
        assert_eq!(ColumnType::MacAddr.to_sql(), "MACADDR");
    }

    #[test]
    fn test_parse_type_text() {
        assert_eq!("varchar(255)".parse::<ColumnType>().unwrap(), ColumnType::Varchar(Some(255)));
        assert_eq!(
            "NUMERIC(12, 4)".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal { precision: 12, scale: 4 }
        );
        assert_eq!(
            "numeric(8)".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal { precision: 8, scale: 0 }
        );
        assert_eq!(
            "integer[]".parse::<ColumnType>().unwrap(),
            ColumnType::Array(Box::new(ColumnType::Integer))
        );
        assert_eq!("DOUBLE PRECISION".parse::<ColumnType>().unwrap(), ColumnType::Double);
        assert_eq!("timestamptz".parse::<ColumnType>().unwrap(), ColumnType::TimestampTz);
    }

    #[test]
    fn test_rendered_types_parse_back() {
        let types = vec![
            ColumnType::SmallInt,
            ColumnType::BigSerial,
            ColumnType::Char(Some(2)),
            ColumnType::Varchar(None),
            ColumnType::Decimal { precision: 6, scale: 3 },
            ColumnType::Interval,
            ColumnType::Array(Box::new(ColumnType::Uuid)),
        ];
        for column_type in types {
            assert_eq!(column_type.to_sql().parse::<ColumnType>().unwrap(), column_type);
        }
    }

    #[test]
    fn test_unknown_type_fails_fast() {
        let err = "geometry".parse::<ColumnType>().unwrap_err();
        assert!(matches!(err, OrmError::Validation(msg) if msg.contains("geometry")));
        assert!("varchar(abc)".parse::<ColumnType>().is_err());
        assert!("varchar(1, 2, 3)".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_size_validation() {
        assert!(ColumnType::Varchar(Some(0)).validate().is_err());
        assert!(ColumnType::Char(Some(0)).validate().is_err());
        assert!(ColumnType::Decimal { precision: 4, scale: 5 }.validate().is_err());
        assert!(ColumnType::Decimal { precision: 0, scale: 0 }.validate().is_err());
        assert!(ColumnType::Decimal { precision: 5, scale: 5 }.validate().is_ok());
        assert!(ColumnType::Array(Box::new(ColumnType::Serial)).validate().is_err());
        assert!(ColumnType::from_name("numeric", None, None, None).is_err());
    }

    #[test]
    fn test_udt_names() {
        assert_eq!(ColumnType::Serial.udt_name(), "int4");
        assert_eq!(ColumnType::Char(Some(3)).udt_name(), "bpchar");
        assert_eq!(ColumnType::Array(Box::new(ColumnType::Integer)).udt_name(), "_int4");
        assert_eq!(ColumnType::from_name("_int4", None, None, None).ok(), None);
    }

    #[test]
    fn test_column_rendering() {
        let mut column = ColumnDescriptor::new("email", ColumnType::Varchar(Some(255)));
        column.not_null().unique();
        assert_eq!(column.to_sql().unwrap(), "\"email\" VARCHAR(255) NOT NULL UNIQUE");

        let mut column = ColumnDescriptor::new("active", ColumnType::Boolean);
        column.default(true);
        assert_eq!(column.to_sql().unwrap(), "\"active\" BOOLEAN DEFAULT TRUE");

        let mut column = ColumnDescriptor::new("title", ColumnType::Text);
        column.default("it's");
        assert_eq!(column.to_sql().unwrap(), "\"title\" TEXT DEFAULT 'it''s'");

        let mut column = ColumnDescriptor::new("id", ColumnType::BigSerial);
        column.primary();
        assert_eq!(column.to_sql().unwrap(), "\"id\" BIGSERIAL NOT NULL PRIMARY KEY");
        assert!(!column.is_nullable());
    }

    #[test]
    fn test_column_validation() {
        assert!(ColumnDescriptor::new("", ColumnType::Text).to_sql().is_err());
        assert!(ColumnDescriptor::new("bad name", ColumnType::Text).to_sql().is_err());

        let mut serial = ColumnDescriptor::new("id", ColumnType::Serial);
        serial.default(1);
        assert!(serial.to_sql().is_err());

        let mut raw = ColumnDescriptor::new("created_at", ColumnType::TimestampTz);
        raw.default_raw("  ");
        assert!(raw.to_sql().is_err());

        let mut nan = ColumnDescriptor::new("ratio", ColumnType::Double);
        nan.default(f64::NAN);
        assert!(nan.to_sql().is_err());
    }
}
