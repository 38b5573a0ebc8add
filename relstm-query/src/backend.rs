//! Backend capability boundary.
//!
//! A backend is a single transactional relational engine reachable
//! synchronously. Each statement is atomic; multi-statement consistency is
//! the caller's concern.

use crate::error::QueryError;
use crate::query::{Predicate, SelectQuery};
use crate::result::{ResultSet, Row};
use serde::{Deserialize, Serialize};

/// Column metadata reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Backend-native type name.
    pub native_type: String,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>, primary_key: bool) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            primary_key,
        }
    }
}

/// Relational engine used by state machines.
pub trait Backend: Send + Sync {
    /// Executes a SELECT built with [`SelectQuery`].
    fn select(&self, query: &SelectQuery) -> Result<ResultSet, QueryError>;

    /// Returns column metadata of a table, in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<ColumnMeta>, QueryError>;

    /// Returns the primary key columns of a table, in key order.
    fn primary_key(&self, table: &str) -> Result<Vec<String>, QueryError>;

    /// Inserts a row and returns it as stored, including generated keys.
    fn insert(&self, table: &str, row: Row) -> Result<Row, QueryError>;

    /// Updates matching rows, returning the number of affected rows.
    fn update(&self, table: &str, filter: &[Predicate], values: Row) -> Result<u64, QueryError>;

    /// Deletes matching rows, returning the number of affected rows.
    fn delete(&self, table: &str, filter: &[Predicate]) -> Result<u64, QueryError>;
}
