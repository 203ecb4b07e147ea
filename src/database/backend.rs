/*!
 * Uniform backend interface.
 *
 * Repositories talk to storage exclusively through the `Backend` and
 * `BackendTransaction` traits defined here. SQL is written once with
 * numbered `?N` placeholders; each adapter translates it for its engine.
 * Values cross the boundary as the portable `Value` type so no engine
 * specific type leaks into repository code.
 */

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};
use std::fmt;

/// SQL dialect spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded file-backed engine
    Sqlite,
    /// Managed remote engine
    Postgres,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

/// A single bound parameter or result column
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<usize> for Value {
    /// Sizes past `i64::MAX` clamp to it
    fn from(v: usize) -> Self {
        Value::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(if v { 1 } else { 0 })
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Build a `Vec<Value>` parameter list from heterogeneous arguments
#[macro_export]
macro_rules! args {
    () => { Vec::<$crate::database::backend::Value>::new() };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::database::backend::Value::from($arg)),+]
    };
}

/// Conversion from a result column into a Rust type
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::Real(f) => Ok(*f as i64),
            Value::Text(s) => s
                .parse()
                .map_err(|_| anyhow!("Expected integer, found text '{}'", s)),
            Value::Null => Err(anyhow!("Expected integer, found NULL")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(f) => Ok(*f),
            Value::Text(s) => s
                .parse()
                .map_err(|_| anyhow!("Expected real, found text '{}'", s)),
            Value::Null => Err(anyhow!("Expected real, found NULL")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(i64::from_value(value)? != 0)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Real(f) => Ok(f.to_string()),
            Value::Null => Err(anyhow!("Expected text, found NULL")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One result row, columns in select-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Read column `idx` as `T`
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| anyhow!("Column index {} out of range ({} columns)", idx, self.values.len()))?;
        T::from_value(value).map_err(|e| anyhow!("Column {}: {}", idx, e))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An open transaction on a backend.
///
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait BackendTransaction: Send {
    /// Execute a statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and collect all rows
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Run a query expected to yield at most one row
    async fn query_opt(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run an `INSERT ... RETURNING id` statement and return the new id
    async fn insert_returning_id(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let row = self
            .query_opt(sql, params)
            .await?
            .ok_or_else(|| anyhow!("Insert returned no id"))?;
        row.get(0)
    }
}

/// A storage engine adapter
#[async_trait]
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Human readable, credential-free description for logs
    fn describe(&self) -> String;

    /// Execute a single statement, returning the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute several `;`-separated statements without parameters
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Run a query and collect all rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Compile a statement ahead of time so later executions reuse the plan
    async fn prepare(&self, sql: &str) -> Result<()>;

    async fn begin(&self) -> Result<Box<dyn BackendTransaction>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool>;

    /// Release the underlying connection(s)
    async fn close(&self);

    /// Run a query expected to yield at most one row
    async fn query_opt(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run a scalar `COUNT(*)`-style query
    async fn query_count(&self, sql: &str, params: &[Value]) -> Result<i64> {
        match self.query_opt(sql, params).await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}

/// Escape `%`, `_` and `\` so user text matches literally inside a LIKE pattern.
///
/// Patterns built from the result must be used with `ESCAPE '\'`.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `term%`, lowercased
pub fn prefix_pattern(term: &str) -> String {
    format!("{}%", escape_like(&term.to_lowercase()))
}

/// `%term`, lowercased
pub fn suffix_pattern(term: &str) -> String {
    format!("%{}", escape_like(&term.to_lowercase()))
}

/// `%term%`, lowercased
pub fn contains_pattern(term: &str) -> String {
    format!("%{}%", escape_like(&term.to_lowercase()))
}

/// Format an instant the way every timestamp column stores it.
///
/// The fixed-width UTC form keeps lexicographic and chronological order identical
/// on both engines.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Earliest and latest stored timestamps; both still sort correctly as text
pub const FAR_PAST: &str = "0000-01-01T00:00:00.000Z";
pub const FAR_FUTURE: &str = "9999-12-31T23:59:59.999Z";

/// Timestamp `offset` away from now (negative offsets point to the past).
///
/// Offsets reaching beyond four-digit years clamp to `FAR_PAST` or `FAR_FUTURE`.
pub fn timestamp_from_now(offset: Duration) -> String {
    match Utc::now().checked_add_signed(offset) {
        Some(at) if (0..=9999).contains(&at.year()) => format_timestamp(at),
        _ if offset < Duration::zero() => FAR_PAST.to_string(),
        _ => FAR_FUTURE.to_string(),
    }
}

/// Numbered placeholder list `?start, ?start+1, ...` of length `count`
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
