// 🧱 Query Builder - structured IR for dynamic breakdown SQL
//
// Predicates are an ordered list, joins are deduplicated by name, and every
// value goes through a numbered `?N` parameter. Nothing here touches a
// database, so the SQL shape is unit-testable on its own.

use rusqlite::types::Value;

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    from: String,
    selects: Vec<String>,
    /// (name, sql) in insertion order
    joins: Vec<(String, String)>,
    predicates: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    params: Vec<Value>,
}

impl QueryBuilder {
    pub fn new(from: &str) -> Self {
        QueryBuilder {
            from: from.to_string(),
            ..Default::default()
        }
    }

    /// Register a parameter and return its placeholder ("?3").
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    pub fn select(&mut self, expr: impl Into<String>) -> &mut Self {
        self.selects.push(expr.into());
        self
    }

    /// Add a join unless one with the same name is already present.
    /// Returns true when the join was added.
    pub fn join(&mut self, name: &str, sql: impl Into<String>) -> bool {
        if self.has_join(name) {
            return false;
        }
        self.joins.push((name.to_string(), sql.into()));
        true
    }

    pub fn has_join(&self, name: &str) -> bool {
        self.joins.iter().any(|(n, _)| n == name)
    }

    pub fn filter(&mut self, predicate: impl Into<String>) -> &mut Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn order_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// `f.fiscal_year IN (?1, ?2)`
    pub fn filter_in(&mut self, column: &str, values: impl IntoIterator<Item = Value>) -> &mut Self {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        if placeholders.is_empty() {
            // IN () never matches
            self.filter("0")
        } else {
            self.filter(format!("{} IN ({})", column, placeholders.join(", ")))
        }
    }

    /// `column = ?N`, or `column IS NULL` for None.
    pub fn filter_eq_or_null(&mut self, column: &str, value: Option<Value>) -> &mut Self {
        match value {
            Some(v) => {
                let p = self.bind(v);
                self.filter(format!("{} = {}", column, p))
            }
            None => self.filter(format!("{} IS NULL", column)),
        }
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        if self.selects.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.selects.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.from);

        for (_, join) in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        (sql, self.params.clone())
    }
}
