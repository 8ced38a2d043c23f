//! Database Backend Abstractions
//!
//! The connection handle abstraction consumed by the schema builder and the
//! migrator, plus its PostgreSQL implementation.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use postgres::{PostgresPool, PostgresRow, PostgresTransaction};
