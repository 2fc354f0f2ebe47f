use chrono::{DateTime, Utc};
use sqlx::MySqlConnection;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    U32(u32),
    F64(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::U32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTime(v)
    }
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Partial UPDATE builder
/// ===============================
/// Column names are `&'static str` so only code-defined columns ever reach
/// the SQL text; request data travels as bound values.
#[derive(Debug)]
pub struct UpdateBuilder {
    table: &'static str,
    sets: Vec<(&'static str, SqlValue)>,
    guards: Vec<(&'static str, SqlValue)>,
}

impl UpdateBuilder {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Adds `column = ?` when a value was supplied.
    pub fn set<T: Into<SqlValue>>(mut self, column: &'static str, value: Option<T>) -> Self {
        if let Some(v) = value {
            self.sets.push((column, v.into()));
        }
        self
    }

    /// Extra `AND column = ?` condition next to the id match.
    pub fn guard<T: Into<SqlValue>>(mut self, column: &'static str, value: T) -> Self {
        self.guards.push((column, value.into()));
        self
    }

    /// `None` when there is nothing to set.
    pub fn build(self, id_column: &'static str, id: u64) -> Option<SqlUpdate> {
        if self.sets.is_empty() {
            return None;
        }

        let set_clause = self
            .sets
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("UPDATE {} SET {} WHERE {} = ?", self.table, set_clause, id_column);
        for (column, _) in &self.guards {
            sql.push_str(&format!(" AND {column} = ?"));
        }

        let mut values: Vec<SqlValue> = self.sets.into_iter().map(|(_, v)| v).collect();
        values.push(SqlValue::U64(id));
        values.extend(self.guards.into_iter().map(|(_, v)| v));

        Some(SqlUpdate { sql, values })
    }
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(conn: &mut MySqlConnection, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::U32(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::DateTime(v) => query.bind(v),
        };
    }

    let result = query.execute(conn).await?;
    Ok(result.rows_affected())
}
