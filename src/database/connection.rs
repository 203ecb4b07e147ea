/*!
 * Database connection management.
 *
 * `DatabaseManager` is constructed once at process start and shared (behind
 * an `Arc`) with every repository. It owns the backend connection and the
 * shared statement set. `ensure_initialized` selects the backend from
 * configuration, creates the schema, runs migrations and (embedded only)
 * builds indexes and applies tuning. Concurrent first callers wait on the
 * same initialization instead of opening a second connection.
 */

use anyhow::Context;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::backend::{now_timestamp, Backend, Dialect};
use super::models::{MaintenanceReport, StepReport};
use super::schema;
use super::sqlite::SqliteBackend;
use super::statements::{Statements, STATEMENTS};
use crate::app_config::{BackendKind, DatabaseConfig};
use crate::errors::{DatabaseError, DbResult};

/// A ready, schema-correct connection and its statement set
pub struct Database {
    backend: Arc<dyn Backend>,
    statements: Statements,
    report: StepReport,
}

impl Database {
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn statements(&self) -> &Statements {
        &self.statements
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Schema steps applied and non-fatal warnings collected during initialization
    pub fn init_report(&self) -> &StepReport {
        &self.report
    }
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DatabaseStats {
    pub entries: i64,
    pub meanings: i64,
    pub examples: i64,
    pub cached_lemmas: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entries: {}, Meanings: {}, Examples: {}, Cached lemmas: {}",
            self.entries, self.meanings, self.examples, self.cached_lemmas
        )
    }
}

/// Open the backend selected by configuration
pub async fn open_backend(config: &DatabaseConfig) -> DbResult<Arc<dyn Backend>> {
    match config.backend_kind()? {
        BackendKind::Embedded => {
            let backend = SqliteBackend::open(&config.path).map_err(DatabaseError::connection)?;
            Ok(Arc::new(backend))
        }
        BackendKind::Remote => open_remote(config).await,
    }
}

#[cfg(feature = "remote")]
async fn open_remote(config: &DatabaseConfig) -> DbResult<Arc<dyn Backend>> {
    use super::postgres::{PostgresBackend, PostgresOptions};

    let url = config.remote_url.clone().ok_or_else(|| {
        DatabaseError::Connection("remote backend selected but no connection string is set".to_string())
    })?;
    let options = PostgresOptions {
        url,
        max_connections: config.max_connections,
        connect_timeout: Duration::from_secs(config.connect_timeout_secs),
    };

    let backend = PostgresBackend::connect(&options)
        .await
        .map_err(DatabaseError::connection)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "remote"))]
async fn open_remote(_config: &DatabaseConfig) -> DbResult<Arc<dyn Backend>> {
    Err(DatabaseError::Connection(
        "remote backend requested but lexistore was built without the `remote` feature".to_string(),
    ))
}

/// Bring a freshly opened backend to a ready state
async fn prepare_backend(backend: &dyn Backend, config: &DatabaseConfig) -> DbResult<StepReport> {
    let mut report = StepReport::default();
    let embedded = backend.dialect() == Dialect::Sqlite;

    if embedded {
        schema::apply_tuning(backend, &config.tuning)
            .await
            .map_err(DatabaseError::connection)?;
    }

    schema::create_tables(backend)
        .await
        .map_err(|e| DatabaseError::Migration(format!("{:#}", e)))?;

    report.merge(schema::run_migrations(backend).await);

    if embedded {
        report.merge(schema::create_indexes(backend).await);
    }

    // A statement that references a column a failed migration never added must not block startup
    for (name, sql) in STATEMENTS.all() {
        if let Err(e) = backend.prepare(sql).await {
            warn!("Statement {} could not be prepared: {:#}", name, e);
            report.warnings.push(format!("statement {}: {:#}", name, e));
        }
    }

    Ok(report)
}

/// Owner of the single physical connection
pub struct DatabaseManager {
    config: DatabaseConfig,
    state: RwLock<Option<Arc<Database>>>,
    init_lock: Mutex<()>,
}

impl DatabaseManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Manager over a private in-memory embedded database (for testing)
    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::in_memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Initialize on first call; later calls return the ready database.
    ///
    /// On failure any partially opened connection is closed and the manager
    /// stays uninitialized so a later call can retry.
    pub async fn ensure_initialized(&self) -> DbResult<Arc<Database>> {
        let existing = self.state.read().clone();
        if let Some(db) = existing {
            return Ok(db);
        }

        let _init = self.init_lock.lock().await;

        // Another caller may have finished while we waited
        let existing = self.state.read().clone();
        if let Some(db) = existing {
            return Ok(db);
        }

        let backend = open_backend(&self.config).await?;
        info!("Initializing database on {}", backend.describe());

        match prepare_backend(backend.as_ref(), &self.config).await {
            Ok(report) => {
                for warning in &report.warnings {
                    debug!("Initialization warning: {}", warning);
                }
                info!(
                    "Database ready ({} schema change(s), {} warning(s))",
                    report.applied.len(),
                    report.warnings.len()
                );

                let db = Arc::new(Database {
                    backend,
                    statements: STATEMENTS,
                    report,
                });
                *self.state.write() = Some(db.clone());
                Ok(db)
            }
            Err(e) => {
                error!("Database initialization failed: {}", e);
                backend.close().await;
                Err(e)
            }
        }
    }

    /// The initialized database, or `Uninitialized`
    pub fn database(&self) -> DbResult<Arc<Database>> {
        self.state.read().clone().ok_or(DatabaseError::Uninitialized)
    }

    /// Delete expired cache rows and refresh planner statistics.
    ///
    /// Never fails: problems are logged and returned as warnings.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let db = match self.database() {
            Ok(db) => db,
            Err(e) => {
                warn!("Maintenance skipped: {}", e);
                report.warnings.push(e.to_string());
                return report;
            }
        };
        let backend = db.backend();

        match backend.column_exists("lemma_cache", "expires_at").await {
            Ok(true) => {
                match backend
                    .execute(
                        "DELETE FROM lemma_cache WHERE expires_at <= ?1",
                        &[now_timestamp().into()],
                    )
                    .await
                {
                    Ok(removed) => report.expired_cache_rows = removed,
                    Err(e) => {
                        warn!("Expired cache sweep failed: {:#}", e);
                        report.warnings.push(format!("cache sweep: {:#}", e));
                    }
                }
            }
            Ok(false) => debug!("Cache sweep skipped: lemma_cache has no expires_at column"),
            Err(e) => report.warnings.push(format!("cache sweep: {:#}", e)),
        }

        match backend.execute_batch("ANALYZE").await {
            Ok(()) => report.statistics_refreshed = true,
            Err(e) => {
                warn!("Statistics refresh failed: {:#}", e);
                report.warnings.push(format!("analyze: {:#}", e));
            }
        }

        info!(
            "Maintenance finished: {} expired cache row(s) removed",
            report.expired_cache_rows
        );
        report
    }

    /// Run maintenance every `interval` until the manager is closed
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !manager.is_initialized() {
                    debug!("Stopping periodic maintenance: database closed");
                    break;
                }
                manager.run_maintenance().await;
            }
        })
    }

    /// Row counts of the four tables
    pub async fn stats(&self) -> DbResult<DatabaseStats> {
        let db = self.database()?;
        let backend = db.backend();

        let count = |table: &'static str| async move {
            backend
                .query_count(&format!("SELECT COUNT(*) FROM {}", table), &[])
                .await
                .with_context(|| format!("Failed to count {}", table))
        };

        let stats = async {
            Ok::<_, anyhow::Error>(DatabaseStats {
                entries: count("entries").await?,
                meanings: count("meanings").await?,
                examples: count("examples").await?,
                cached_lemmas: count("lemma_cache").await?,
            })
        }
        .await
        .map_err(DatabaseError::read)?;

        Ok(stats)
    }

    /// Release the connection and reset initialization state
    pub async fn close(&self) {
        let _init = self.init_lock.lock().await;
        let db = self.state.write().take();

        if let Some(db) = db {
            db.backend.close().await;
            info!("Database closed");
        }
    }
}
