//! Storage error types.

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("invalid table definition for {table}: {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("query error: {0}")]
    Query(#[from] relstm_query::QueryError),
}
