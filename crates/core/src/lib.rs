//! # keel-core: Shared configuration for keel
//!
//! Migration settings and the ordered list of sources they are loaded from.

pub mod config;

pub use config::{ConfigError, ConfigLoader, ConfigSource, MigrationSettings};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
