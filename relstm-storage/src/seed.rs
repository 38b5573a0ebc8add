//! Table definitions and seed data.
//!
//! ```yaml
//! tables:
//!   - name: orders
//!     columns:
//!       - { name: id, type: integer, primary_key: true, auto_increment: true }
//!       - { name: status, type: text }
//!     rows:
//!       - { id: 1, status: created }
//! ```

use relstm_query::{ColumnMeta, Row};
use serde::{Deserialize, Serialize};

/// Column of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub native_type: String,
    #[serde(default)]
    pub primary_key: bool,
    /// Generate missing values as `max + 1`. Integer key columns only.
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_type() -> String {
    "text".to_string()
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Marks the column as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn meta(&self) -> ColumnMeta {
        ColumnMeta::new(&self.name, &self.native_type, self.primary_key)
    }
}

/// A table and its initial rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub tables: Vec<TableConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_storage_config() {
        let yaml = r#"
tables:
  - name: orders
    columns:
      - { name: id, type: integer, primary_key: true, auto_increment: true }
      - { name: status }
    rows:
      - { id: 1, status: created }
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        let table = &config.tables[0];

        assert_eq!(table.name, "orders");
        assert!(table.columns[0].primary_key);
        assert!(table.columns[0].auto_increment);
        assert_eq!(table.columns[1].native_type, "text");
        assert_eq!(table.rows.len(), 1);
    }
}
