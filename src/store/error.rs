//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Failure to hand out a connection
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted (waited {waited:?})")]
    Exhausted { waited: Duration },

    #[error("Failed to open connection to {database}: {source}")]
    Open {
        database: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Connection pool is closed")]
    Closed,
}

/// Failure of a single storage operation.
///
/// The gateway never raises these to callers; they are carried inside
/// [`StoreOutcome::Failed`](super::StoreOutcome::Failed) and logged.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown field '{field}' for table {table}")]
    UnknownField { table: &'static str, field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Update requires at least one field")]
    EmptyUpdate,

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Fatal problems found while bringing the gateway up
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Storage unreachable at {database}: {source}")]
    Unreachable {
        database: String,
        #[source]
        source: PoolError,
    },

    #[error("Migration {version} ({description}) failed: {source}")]
    Migration {
        version: u32,
        description: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid pool size: min {min}, max {max}")]
    InvalidPoolSize { min: usize, max: usize },
}
