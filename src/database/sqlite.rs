/*!
 * Embedded backend adapter.
 *
 * Wraps a single rusqlite connection. rusqlite is synchronous, so every
 * operation is moved onto tokio's blocking pool; the connection lives behind
 * an async mutex whose owned guard travels with the blocking task. A
 * transaction keeps that guard for its whole lifetime, which serializes it
 * against every other statement on the connection.
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::backend::{Backend, BackendTransaction, Dialect, Row, Value};

/// Path marker used for in-memory databases
pub const MEMORY_PATH: &str = ":memory:";

/// Number of compiled statements kept per connection
const STATEMENT_CACHE_CAPACITY: usize = 64;

type SharedConnection = Arc<Mutex<Option<Connection>>>;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

fn execute_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<u64> {
    let mut stmt = conn
        .prepare_cached(sql)
        .with_context(|| format!("Failed to prepare statement: {}", sql.trim()))?;
    let affected = stmt.execute(params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

fn query_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare_cached(sql)
        .with_context(|| format!("Failed to prepare query: {}", sql.trim()))?;
    let column_count = stmt.column_count();

    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(Value::from(row.get_ref(idx)?));
        }
        Ok(Row::new(values))
    })?;

    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn open_connection(guard: &OwnedMutexGuard<Option<Connection>>) -> Result<&Connection> {
    guard
        .as_ref()
        .ok_or_else(|| anyhow!("Database connection is closed"))
}

/// File-backed (or in-memory) SQLite backend
pub struct SqliteBackend {
    path: PathBuf,
    connection: SharedConnection,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.to_str() == Some(MEMORY_PATH) {
            return Self::open_in_memory();
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        info!("Opening embedded database at: {:?}", path);

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        Ok(Self {
            path,
            connection: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Creating in-memory database");

        let conn = Connection::open_in_memory().context("Failed to create in-memory database")?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            connection: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.connection.clone().lock_owned().await;

        tokio::task::spawn_blocking(move || f(open_connection(&guard)?))
            .await
            .context("Database task panicked")?
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection(move |conn| execute_on(conn, &sql, &params))
            .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection(move |conn| query_on(conn, &sql, &params))
            .await
    }

    async fn prepare(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.prepare_cached(&sql)
                .with_context(|| format!("Failed to prepare statement: {}", sql.trim()))?;
            Ok(())
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn BackendTransaction>> {
        let guard = self.connection.clone().lock_owned().await;

        let guard = tokio::task::spawn_blocking(move || -> Result<_> {
            let conn = open_connection(&guard)?;
            // A panicked task can leave a transaction open on the shared connection
            if !conn.is_autocommit() {
                warn!("Rolling back a transaction left open on the embedded connection");
                conn.execute_batch("ROLLBACK")?;
            }
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(guard)
        })
        .await
        .context("Database transaction task panicked")??;

        Ok(Box::new(SqliteTransaction { guard: Some(guard) }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count = self
            .query_count(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[Value::from(table)],
            )
            .await?;
        Ok(count > 0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let count = self
            .query_count(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                &[Value::from(table), Value::from(column)],
            )
            .await?;
        Ok(count > 0)
    }

    async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("Failed to close embedded database cleanly: {}", e);
            } else {
                debug!("Closed embedded database {:?}", self.path);
            }
        }
    }
}

/// Transaction holding exclusive use of the embedded connection
struct SqliteTransaction {
    guard: Option<OwnedMutexGuard<Option<Connection>>>,
}

impl SqliteTransaction {
    async fn run<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self
            .guard
            .take()
            .ok_or_else(|| anyhow!("Transaction already finished"))?;

        let (guard, result) = tokio::task::spawn_blocking(move || {
            let result = open_connection(&guard).and_then(f);
            (guard, result)
        })
        .await
        .context("Database transaction task panicked")?;

        self.guard = Some(guard);
        result
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> Result<()> {
        self.run(move |conn| {
            conn.execute_batch(statement)?;
            Ok(())
        })
        .await?;
        // Releasing the guard hands the connection back to other callers
        self.guard = None;
        Ok(())
    }
}

#[async_trait]
impl BackendTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| execute_on(conn, &sql, &params)).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| query_on(conn, &sql, &params)).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

fn rollback_abandoned(guard: OwnedMutexGuard<Option<Connection>>) {
    if let Some(conn) = guard.as_ref() {
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned transaction: {}", e);
            }
        }
    }
}

impl Drop for SqliteTransaction {
    /// Rolls back off the async worker; the connection stays locked until the rollback finishes
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || rollback_abandoned(guard));
            }
            Err(_) => rollback_abandoned(guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        SqliteBackend::open_in_memory().expect("Failed to create in-memory DB")
    }

    #[tokio::test]
    async fn test_query_shouldReturnRows() {
        let db = backend();

        let rows = db.query("SELECT 1 + ?1, 'x'", &[Value::Integer(41)]).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>(0).unwrap(), 42);
        assert_eq!(rows[0].get::<String>(1).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_transaction_shouldCommitOnSuccess() {
        let db = backend();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        let id = tx
            .insert_returning_id("INSERT INTO t (name) VALUES (?1) RETURNING id", &[Value::from("a")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(id, 1);
        assert_eq!(db.query_count("SELECT COUNT(*) FROM t", &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transaction_droppedWithoutCommit_shouldRollBack() {
        let db = backend();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            tx.execute("INSERT INTO t (name) VALUES (?1)", &[Value::from("a")])
                .await
                .unwrap();
        }

        assert_eq!(db.query_count("SELECT COUNT(*) FROM t", &[]).await.unwrap(), 0);

        // The connection must be usable for a fresh transaction afterwards
        let tx = db.begin().await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[test]
    fn test_transaction_droppedOutsideRuntime_shouldRollBackInline() {
        let db = backend();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let tx = runtime.block_on(async {
            db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
                .await
                .unwrap();
            let mut tx = db.begin().await.unwrap();
            tx.execute("INSERT INTO t (name) VALUES (?1)", &[Value::from("a")])
                .await
                .unwrap();
            tx
        });

        drop(tx);

        let count = runtime
            .block_on(db.query_count("SELECT COUNT(*) FROM t", &[]))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_columnExists_shouldInspectTableInfo() {
        let db = backend();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        assert!(db.table_exists("t").await.unwrap());
        assert!(!db.table_exists("missing").await.unwrap());
        assert!(db.column_exists("t", "name").await.unwrap());
        assert!(!db.column_exists("t", "order_index").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_shouldRejectLaterQueries() {
        let db = backend();
        db.close().await;

        assert!(db.query("SELECT 1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_open_withNestedPath_shouldCreateParentDirectory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let db = SqliteBackend::open(&path).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();

        assert!(path.exists());
        assert_eq!(db.describe(), format!("sqlite:{}", path.display()));
    }
}
