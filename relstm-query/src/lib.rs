//! # relstm-query
//!
//! Query building capability for relstm.
//!
//! This crate provides:
//! - `SelectQuery`, a mutable SELECT/WHERE/LIMIT builder
//! - Parameterized equality predicates and SQL rendering
//! - Result sets with single-column and row-as-map fetching
//! - The `Backend` trait implemented by relational engines

pub mod backend;
pub mod error;
pub mod query;
pub mod result;

pub use backend::{Backend, ColumnMeta};
pub use error::QueryError;
pub use query::{quote_ident, Predicate, Projection, SelectQuery};
pub use result::{ResultSet, Row};
