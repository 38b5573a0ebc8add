//! SELECT query builder.
//!
//! A `SelectQuery` is built up step by step (projection, FROM, WHERE,
//! LIMIT), executed once by a [`Backend`](crate::Backend) and dropped.
//! Values never appear in the rendered SQL; they are bound as `?`
//! parameters in the order returned by [`SelectQuery::params`].

use serde_json::Value;
use std::fmt::Write;

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// One item of the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// All columns of the FROM table (`table.*`).
    AllColumns,
    /// A single column, optionally renamed.
    Column { name: String, alias: Option<String> },
    /// A bound constant under an alias.
    Literal { value: Value, alias: String },
}

impl Projection {
    pub fn column(name: impl Into<String>) -> Self {
        Projection::Column {
            name: name.into(),
            alias: None,
        }
    }

    pub fn column_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Projection::Column {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn literal(value: impl Into<Value>, alias: impl Into<String>) -> Self {
        Projection::Literal {
            value: value.into(),
            alias: alias.into(),
        }
    }
}

/// Parameterized equality predicate (`column = ?`).
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: Value,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if the given value satisfies this predicate.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match value {
            Some(v) => *v == self.value,
            None => self.value.is_null(),
        }
    }
}

/// Mutable SELECT/WHERE/LIMIT builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    table: Option<String>,
    projections: Vec<Projection>,
    predicates: Vec<Predicate>,
    limit: Option<usize>,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the FROM table.
    pub fn from(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = Some(table.into());
        self
    }

    /// Appends an item to the select list.
    pub fn select(&mut self, projection: Projection) -> &mut Self {
        self.projections.push(projection);
        self
    }

    /// Empties the select list.
    pub fn clear_select(&mut self) -> &mut Self {
        self.projections.clear();
        self
    }

    /// Adds an equality predicate, AND-combined with existing ones.
    pub fn where_eq(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicates.push(Predicate::eq(column, value));
        self
    }

    /// Adds a prepared predicate.
    pub fn filter(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// Renders the query with `?` placeholders.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.projections.is_empty() {
            sql.push('*');
        }
        for (i, projection) in self.projections.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            match projection {
                Projection::AllColumns => match &self.table {
                    Some(table) => {
                        let _ = write!(sql, "{}.*", quote_ident(table));
                    }
                    None => sql.push('*'),
                },
                Projection::Column { name, alias } => {
                    sql.push_str(&quote_ident(name));
                    if let Some(alias) = alias {
                        let _ = write!(sql, " AS {}", quote_ident(alias));
                    }
                }
                Projection::Literal { alias, .. } => {
                    let _ = write!(sql, "? AS {}", quote_ident(alias));
                }
            }
        }

        if let Some(table) = &self.table {
            let _ = write!(sql, " FROM {}", quote_ident(table));
        }

        for (i, predicate) in self.predicates.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            if predicate.value.is_null() {
                let _ = write!(sql, "{} IS NULL", quote_ident(&predicate.column));
            } else {
                let _ = write!(sql, "{} = ?", quote_ident(&predicate.column));
            }
        }

        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }

        sql
    }

    /// Returns bound parameters in placeholder order.
    pub fn params(&self) -> Vec<&Value> {
        let literals = self.projections.iter().filter_map(|p| match p {
            Projection::Literal { value, .. } => Some(value),
            _ => None,
        });
        let predicates = self
            .predicates
            .iter()
            .filter(|p| !p.value.is_null())
            .map(|p| &p.value);
        literals.chain(predicates).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_render_keyed_select() {
        let mut q = SelectQuery::new();
        q.from("orders")
            .select(Projection::AllColumns)
            .select(Projection::column_as("status", "__state"))
            .where_eq("id", 7)
            .limit(1);

        assert_eq!(
            q.to_sql(),
            "SELECT \"orders\".*, \"status\" AS \"__state\" FROM \"orders\" WHERE \"id\" = ? LIMIT 1"
        );
        assert_eq!(q.params(), vec![&json!(7)]);
    }

    #[test]
    fn test_literal_params_come_first() {
        let mut q = SelectQuery::new();
        q.from("tags")
            .select(Projection::literal("exists", "__state"))
            .where_eq("owner", "alice")
            .where_eq("slug", "rust");

        assert_eq!(
            q.to_sql(),
            "SELECT ? AS \"__state\" FROM \"tags\" WHERE \"owner\" = ? AND \"slug\" = ?"
        );
        assert_eq!(
            q.params(),
            vec![&json!("exists"), &json!("alice"), &json!("rust")]
        );
    }

    #[test]
    fn test_null_predicate() {
        let mut q = SelectQuery::new();
        q.from("t").where_eq("deleted_at", Value::Null);

        assert_eq!(q.to_sql(), "SELECT * FROM \"t\" WHERE \"deleted_at\" IS NULL");
        assert!(q.params().is_empty());
        assert!(q.predicates()[0].matches(None));
        assert!(!q.predicates()[0].matches(Some(&json!(1))));
    }

    #[test]
    fn test_clear_select() {
        let mut q = SelectQuery::new();
        q.from("t").select(Projection::column("a")).clear_select();
        assert!(q.projections().is_empty());
    }
}
