//! Typed DDL
//!
//! Column and table descriptors, the PostgreSQL compiler, catalog
//! introspection, and the [`SchemaBuilder`] handle changesets use to apply
//! them inside a transaction.

pub mod builder;
pub mod column;
pub mod compiler;
pub mod introspector;
pub mod table;

pub use builder::SchemaBuilder;
pub use column::{ColumnDescriptor, ColumnType, DefaultValue};
pub use compiler::{quote_identifier, quote_literal, validate_identifier, DdlCompiler};
pub use introspector::{ColumnShape, IndexShape, Introspector, TableShape};
pub use table::{
    ForeignKeyDefinition, IndexDefinition, ReferentialAction, TableBuilder, TableCommand, TableIntent,
};
