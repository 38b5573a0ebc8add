//! Query results.

use serde_json::Value;
use std::collections::BTreeMap;

/// A row as a column-name to value map.
pub type Row = BTreeMap<String, Value>;

/// Materialized result of a SELECT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates a result set. Every row must have one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns column `index` of the first row.
    pub fn fetch_column(&self, index: usize) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get(index))
    }

    /// Returns the first row as a map.
    pub fn fetch_row(&self) -> Option<Row> {
        self.rows.first().map(|row| self.to_map(row))
    }

    /// Returns all rows as maps.
    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.rows.iter().map(|row| self.to_map(row))
    }

    fn to_map(&self, row: &[Value]) -> Row {
        self.columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_column_and_row() {
        let rs = ResultSet::new(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
        );

        assert_eq!(rs.len(), 2);
        assert_eq!(rs.fetch_column(1), Some(&json!("a")));
        let row = rs.fetch_row().unwrap();
        assert_eq!(row["id"], json!(1));
        assert_eq!(rs.rows().count(), 2);
    }

    #[test]
    fn test_empty_result() {
        let rs = ResultSet::new(vec!["id".to_string()], vec![]);
        assert!(rs.is_empty());
        assert!(rs.fetch_column(0).is_none());
        assert!(rs.fetch_row().is_none());
    }
}
