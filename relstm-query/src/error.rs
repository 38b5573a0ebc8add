//! Query error types.

use thiserror::Error;

/// Errors raised by a query backend.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("query has no FROM table")]
    MissingTable,

    #[error("duplicate primary key in {table}: {key}")]
    DuplicateKey { table: String, key: String },

    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl QueryError {
    /// Returns an error code suitable for diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::TableNotFound(_) => "TABLE_NOT_FOUND",
            QueryError::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            QueryError::MissingTable => "BAD_QUERY",
            QueryError::DuplicateKey { .. } => "DUPLICATE_KEY",
            QueryError::Constraint(_) => "CONSTRAINT",
        }
    }
}
