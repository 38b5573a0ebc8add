//! # relstm-storage
//!
//! In-memory relational backend for relstm.
//!
//! This crate provides:
//! - `MemoryBackend`, a `Backend` over in-process tables
//! - Column and primary key metadata for schema introspection
//! - Auto-increment key generation
//! - Table definitions and seed rows loaded from configuration

pub mod error;
pub mod memory;
pub mod seed;

pub use error::StorageError;
pub use memory::MemoryBackend;
pub use seed::{ColumnDef, StorageConfig, TableConfig};
