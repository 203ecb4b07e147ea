/*!
 * Managed remote backend adapter (PostgreSQL through sqlx).
 *
 * Statements arrive with `?N` placeholders and are rewritten to `$N` before
 * they reach the server. sqlx caches prepared statements per pooled
 * connection, so `prepare` only has to compile a statement once to warm it.
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, PgPool, Postgres, Row as _, TypeInfo};
use std::time::Duration;

use super::backend::{Backend, BackendTransaction, Dialect, Row, Value};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\?(\d+)").expect("placeholder pattern is valid")
});

/// Rewrite `?N` placeholders into PostgreSQL's `$N` form
pub fn translate_placeholders(sql: &str) -> String {
    PLACEHOLDER.replace_all(sql, "$$${1}").into_owned()
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Integer(i) => query.bind(*i),
            Value::Real(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(|v| Value::Integer(v as i64)),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(|v| Value::Integer(v as i64)),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Integer),
            "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(|v| Value::Real(v as f64)),
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::Real),
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(idx)?.map(Value::Text)
            }
            other => {
                return Err(anyhow!(
                    "Unsupported column type {} for column '{}'",
                    other,
                    column.name()
                ))
            }
        };
        values.push(value.unwrap_or(Value::Null));
    }

    Ok(Row::new(values))
}

/// Connection settings for the remote backend
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

/// PostgreSQL backend over a sqlx pool
pub struct PostgresBackend {
    pool: PgPool,
    description: String,
}

impl PostgresBackend {
    /// Connect to the server described by `options`
    pub async fn connect(options: &PostgresOptions) -> Result<Self> {
        let description = redact_url(&options.url)?;
        info!("Connecting to remote database at {}", description);

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect(&options.url)
            .await
            .with_context(|| format!("Failed to connect to {}", description))?;

        Ok(Self { pool, description })
    }
}

/// Credential-free `postgres://host:port/db` form of a connection string
pub fn redact_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw).context("Remote database URL is not a valid URL")?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Remote database URL has no host"))?;

    let mut description = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        description.push_str(&format!(":{}", port));
    }
    description.push_str(parsed.path());
    Ok(description)
}

#[async_trait]
impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = translate_placeholders(sql);
        let result = bind_values(sqlx::query(&sql), params)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute: {}", sql.trim()))?;
        Ok(result.rows_affected())
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .context("Failed to execute batch")?;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = translate_placeholders(sql);
        let rows = bind_values(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query: {}", sql.trim()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn prepare(&self, sql: &str) -> Result<()> {
        let sql = translate_placeholders(sql);
        (&self.pool)
            .prepare(sql.as_str())
            .await
            .with_context(|| format!("Failed to prepare statement: {}", sql.trim()))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn BackendTransaction>> {
        let tx = self.pool.begin().await.context("Failed to begin transaction")?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count = self
            .query_count(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = ?1",
                &[Value::from(table)],
            )
            .await?;
        Ok(count > 0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let count = self
            .query_count(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = ?1 AND column_name = ?2",
                &[Value::from(table), Value::from(column)],
            )
            .await?;
        Ok(count > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Closed remote database pool {}", self.description);
    }
}

/// Transaction on one pooled connection; sqlx rolls it back on drop
struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| anyhow!("Transaction already finished"))
    }
}

#[async_trait]
impl BackendTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = translate_placeholders(sql);
        let tx = self.active()?;
        let result = bind_values(sqlx::query(&sql), params)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to execute: {}", sql.trim()))?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = translate_placeholders(sql);
        let tx = self.active()?;
        let rows = bind_values(sqlx::query(&sql), params)
            .fetch_all(&mut **tx)
            .await
            .with_context(|| format!("Failed to query: {}", sql.trim()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("Transaction already finished"))?;
        tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("Transaction already finished"))?;
        tx.rollback().await.context("Failed to roll back transaction")
    }
}
