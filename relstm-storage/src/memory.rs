//! In-memory relational backend.
//!
//! Tables live behind a single `RwLock`, so every statement is atomic with
//! respect to every other statement. There is no multi-statement
//! transaction; callers needing read-modify-write isolation must serialize
//! their own access.

use crate::error::StorageError;
use crate::seed::{ColumnDef, StorageConfig};
use parking_lot::RwLock;
use relstm_query::{Backend, ColumnMeta, Predicate, Projection, QueryError, ResultSet, Row, SelectQuery};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Table {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    /// Next auto-increment value per column. Never decreases, so keys of
    /// deleted rows are not handed out again.
    auto_next: HashMap<String, i64>,
}

impl Table {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn check_column(&self, table: &str, name: &str) -> Result<(), QueryError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(QueryError::ColumnNotFound {
                table: table.to_string(),
                column: name.to_string(),
            })
        }
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn matches(row: &Row, filter: &[Predicate]) -> bool {
        filter.iter().all(|p| p.matches(row.get(&p.column)))
    }

    fn next_auto_value(&mut self, column: &str) -> i64 {
        let next = self.auto_next.entry(column.to_string()).or_insert(1);
        let value = *next;
        *next += 1;
        value
    }

    fn observe_auto_value(&mut self, column: &str, value: i64) {
        let next = self.auto_next.entry(column.to_string()).or_insert(1);
        *next = (*next).max(value.saturating_add(1));
    }
}

/// A `Backend` over in-process tables.
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Table>>,

    /// Number of backend calls served, for diagnostics.
    queries: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            queries: AtomicU64::new(0),
        }
    }

    /// Creates a backend with tables and rows from configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend = Self::new();
        for table in &config.tables {
            backend.create_table(&table.name, table.columns.clone())?;
            for row in &table.rows {
                backend.insert(&table.name, row.clone())?;
            }
            tracing::debug!("Seeded table {} with {} rows", table.name, table.rows.len());
        }
        backend.reset_query_count();
        Ok(backend)
    }

    /// Creates a table.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<(), StorageError> {
        if columns.is_empty() {
            return Err(StorageError::InvalidTable {
                table: name.to_string(),
                reason: "no columns".to_string(),
            });
        }
        if let Some(c) = columns.iter().find(|c| c.auto_increment && !c.primary_key) {
            return Err(StorageError::InvalidTable {
                table: name.to_string(),
                reason: format!("auto_increment column '{}' is not a key column", c.name),
            });
        }

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            Table {
                columns,
                rows: Vec::new(),
                auto_next: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Returns the number of backend calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::Relaxed);
    }

    /// Returns the number of rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize, QueryError> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))
    }

    fn count(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }
}

impl Backend for MemoryBackend {
    fn select(&self, query: &SelectQuery) -> Result<ResultSet, QueryError> {
        self.count();
        tracing::debug!(sql = %query.to_sql(), params = query.params().len(), "select");

        let table_name = query.table().ok_or(QueryError::MissingTable)?;
        let tables = self.tables.read();
        let table = tables
            .get(table_name)
            .ok_or_else(|| QueryError::TableNotFound(table_name.to_string()))?;

        for predicate in query.predicates() {
            table.check_column(table_name, &predicate.column)?;
        }

        // Resolve the select list into (output name, source)
        enum Source<'a> {
            Column(&'a str),
            Literal(&'a Value),
        }
        let mut outputs: Vec<(String, Source<'_>)> = Vec::new();
        let projections = query.projections();
        if projections.is_empty() {
            for c in &table.columns {
                outputs.push((c.name.clone(), Source::Column(&c.name)));
            }
        }
        for projection in projections {
            match projection {
                Projection::AllColumns => {
                    for c in &table.columns {
                        outputs.push((c.name.clone(), Source::Column(&c.name)));
                    }
                }
                Projection::Column { name, alias } => {
                    table.check_column(table_name, name)?;
                    let out = alias.clone().unwrap_or_else(|| name.clone());
                    outputs.push((out, Source::Column(name)));
                }
                Projection::Literal { value, alias } => {
                    outputs.push((alias.clone(), Source::Literal(value)));
                }
            }
        }

        let limit = query.limit_value().unwrap_or(usize::MAX);
        let rows = table
            .rows
            .iter()
            .filter(|row| Table::matches(row, query.predicates()))
            .take(limit)
            .map(|row| {
                outputs
                    .iter()
                    .map(|(_, source)| match source {
                        Source::Column(name) => row.get(*name).cloned().unwrap_or(Value::Null),
                        Source::Literal(value) => (*value).clone(),
                    })
                    .collect()
            })
            .collect();

        let columns = outputs.into_iter().map(|(name, _)| name).collect();
        Ok(ResultSet::new(columns, rows))
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnMeta>, QueryError> {
        self.count();
        self.tables
            .read()
            .get(table)
            .map(|t| t.columns.iter().map(ColumnDef::meta).collect())
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))
    }

    fn primary_key(&self, table: &str) -> Result<Vec<String>, QueryError> {
        self.count();
        self.tables
            .read()
            .get(table)
            .map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.name.clone())
                    .collect()
            })
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))
    }

    fn insert(&self, table: &str, mut row: Row) -> Result<Row, QueryError> {
        self.count();
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))?;

        for column in row.keys() {
            t.check_column(table, column)?;
        }

        let mut generated = Vec::new();
        for c in &t.columns {
            let missing = row.get(&c.name).map_or(true, Value::is_null);
            if missing && c.auto_increment {
                generated.push(c.name.clone());
            } else if missing && c.primary_key {
                return Err(QueryError::Constraint(format!(
                    "{}.{} is part of the primary key and cannot be null",
                    table, c.name
                )));
            } else if missing {
                row.insert(c.name.clone(), Value::Null);
            }
        }

        for column in generated {
            let value = t.next_auto_value(&column);
            row.insert(column, Value::from(value));
        }
        let explicit: Vec<(String, i64)> = t
            .columns
            .iter()
            .filter(|c| c.auto_increment)
            .filter_map(|c| row.get(&c.name).and_then(Value::as_i64).map(|v| (c.name.clone(), v)))
            .collect();
        for (column, value) in explicit {
            t.observe_auto_value(&column, value);
        }

        let key = t.key_of(&row);
        if !key.is_empty() && t.rows.iter().any(|r| t.key_of(r) == key) {
            return Err(QueryError::DuplicateKey {
                table: table.to_string(),
                key: Value::Array(key).to_string(),
            });
        }

        t.rows.push(row.clone());
        Ok(row)
    }

    fn update(&self, table: &str, filter: &[Predicate], values: Row) -> Result<u64, QueryError> {
        self.count();
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))?;

        for column in filter.iter().map(|p| &p.column).chain(values.keys()) {
            t.check_column(table, column)?;
        }

        let mut affected = 0;
        for row in t.rows.iter_mut().filter(|r| Table::matches(r, filter)) {
            for (k, v) in &values {
                row.insert(k.clone(), v.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    fn delete(&self, table: &str, filter: &[Predicate]) -> Result<u64, QueryError> {
        self.count();
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| QueryError::TableNotFound(table.to_string()))?;

        for predicate in filter {
            t.check_column(table, &predicate.column)?;
        }

        let before = t.rows.len();
        t.rows.retain(|r| !Table::matches(r, filter));
        Ok((before - t.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn orders() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .create_table(
                "orders",
                vec![
                    ColumnDef::new("id", "integer").primary_key().auto_increment(),
                    ColumnDef::new("status", "text"),
                    ColumnDef::new("owner", "integer"),
                ],
            )
            .unwrap();
        backend
    }

    #[test]
    fn test_insert_generates_keys() {
        let backend = orders();

        let first = backend
            .insert("orders", row(json!({"status": "created"})))
            .unwrap();
        let second = backend
            .insert("orders", row(json!({"status": "paid", "owner": 3})))
            .unwrap();

        assert_eq!(first["id"], json!(1));
        assert_eq!(first["owner"], Value::Null);
        assert_eq!(second["id"], json!(2));
        assert_eq!(backend.row_count("orders").unwrap(), 2);
    }

    #[test]
    fn test_auto_increment_not_reused() {
        let backend = orders();
        backend.insert("orders", row(json!({"status": "a"}))).unwrap();
        backend.insert("orders", row(json!({"status": "b"}))).unwrap();

        assert_eq!(backend.delete("orders", &[Predicate::eq("id", 2)]).unwrap(), 1);
        let next = backend.insert("orders", row(json!({"status": "c"}))).unwrap();
        assert_eq!(next["id"], json!(3));

        backend.insert("orders", row(json!({"id": 10}))).unwrap();
        assert_eq!(backend.delete("orders", &[Predicate::eq("id", 10)]).unwrap(), 1);
        let next = backend.insert("orders", row(json!({"status": "d"}))).unwrap();
        assert_eq!(next["id"], json!(11));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let backend = orders();
        backend.insert("orders", row(json!({"id": 5}))).unwrap();

        let result = backend.insert("orders", row(json!({"id": 5})));
        assert!(matches!(result, Err(QueryError::DuplicateKey { .. })));
    }

    #[test]
    fn test_select_with_predicates_and_limit() {
        let backend = orders();
        for status in ["created", "paid", "paid"] {
            backend
                .insert("orders", row(json!({"status": status})))
                .unwrap();
        }

        let mut q = SelectQuery::new();
        q.from("orders")
            .select(Projection::column("id"))
            .select(Projection::column_as("status", "__state"))
            .where_eq("status", "paid")
            .limit(1);
        let rs = backend.select(&q).unwrap();

        assert_eq!(rs.columns(), ["id".to_string(), "__state".to_string()]);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.fetch_column(0), Some(&json!(2)));
    }

    #[test]
    fn test_select_literal_projection() {
        let backend = orders();
        backend.insert("orders", row(json!({"id": 9}))).unwrap();

        let mut q = SelectQuery::new();
        q.from("orders")
            .select(Projection::literal("exists", "__state"))
            .where_eq("id", 9);

        assert_eq!(backend.select(&q).unwrap().fetch_column(0), Some(&json!("exists")));
    }

    #[test]
    fn test_unknown_column_in_where() {
        let backend = orders();
        let mut q = SelectQuery::new();
        q.from("orders").where_eq("nope", 1);

        assert!(matches!(
            backend.select(&q),
            Err(QueryError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let backend = orders();
        backend.insert("orders", row(json!({"status": "created"}))).unwrap();

        let filter = [Predicate::eq("id", 1)];
        let updated = backend
            .update("orders", &filter, row(json!({"status": "paid"})))
            .unwrap();
        assert_eq!(updated, 1);

        let missing = backend
            .update("orders", &[Predicate::eq("id", 2)], row(json!({"status": "x"})))
            .unwrap();
        assert_eq!(missing, 0);

        assert_eq!(backend.delete("orders", &filter).unwrap(), 1);
        assert_eq!(backend.row_count("orders").unwrap(), 0);
    }

    #[test]
    fn test_introspection_and_query_count() {
        let backend = orders();
        assert_eq!(backend.query_count(), 0);

        let columns = backend.columns("orders").unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert_eq!(backend.primary_key("orders").unwrap(), vec!["id".to_string()]);
        assert_eq!(backend.query_count(), 2);

        assert!(matches!(
            backend.columns("missing"),
            Err(QueryError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config: StorageConfig = serde_yaml::from_str(
            r#"
tables:
  - name: tags
    columns:
      - { name: slug, primary_key: true }
    rows:
      - { slug: rust }
      - { slug: sql }
"#,
        )
        .unwrap();

        let backend = MemoryBackend::from_config(&config).unwrap();
        assert_eq!(backend.row_count("tags").unwrap(), 2);
        assert_eq!(backend.query_count(), 0);
    }

    #[test]
    fn test_auto_increment_requires_key() {
        let backend = MemoryBackend::new();
        let result = backend.create_table("t", vec![ColumnDef::new("n", "integer").auto_increment()]);
        assert!(matches!(result, Err(StorageError::InvalidTable { .. })));
    }
}
