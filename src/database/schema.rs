/*!
 * Database schema definitions and migrations.
 *
 * Tables are created with "if absent" semantics. Schema evolution is
 * strictly additive: every migration checks for its column before altering
 * the table and backfills only rows that lack a value, so the whole set can
 * run on every startup. Migration and index failures are reported as
 * warnings and never abort initialization.
 */

use anyhow::{Context, Result};
use log::{debug, info, warn};

use super::backend::{Backend, Dialect, Value};
use super::models::StepReport;
use crate::app_config::SqliteTuning;

const SQLITE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        headword TEXT NOT NULL,
        part_of_speech TEXT,
        source_language TEXT NOT NULL,
        target_language TEXT NOT NULL,
        definition_language TEXT,
        has_context INTEGER NOT NULL DEFAULT 0,
        context_sentence TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );

    CREATE TABLE IF NOT EXISTS meanings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
        definition TEXT NOT NULL,
        order_index INTEGER,
        noun_type TEXT,
        verb_type TEXT,
        comparison TEXT
    );

    CREATE TABLE IF NOT EXISTS examples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        meaning_id INTEGER NOT NULL REFERENCES meanings(id) ON DELETE CASCADE,
        sentence TEXT NOT NULL,
        translation TEXT,
        is_context_sentence INTEGER NOT NULL DEFAULT 0,
        order_index INTEGER
    );

    CREATE TABLE IF NOT EXISTS lemma_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        word TEXT NOT NULL,
        lemma TEXT NOT NULL,
        target_language TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT,
        hit_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE(word, target_language)
    );
"#;

const POSTGRES_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS entries (
        id BIGSERIAL PRIMARY KEY,
        headword TEXT NOT NULL,
        part_of_speech TEXT,
        source_language TEXT NOT NULL,
        target_language TEXT NOT NULL,
        definition_language TEXT,
        has_context BIGINT NOT NULL DEFAULT 0,
        context_sentence TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT
    );

    CREATE TABLE IF NOT EXISTS meanings (
        id BIGSERIAL PRIMARY KEY,
        entry_id BIGINT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
        definition TEXT NOT NULL,
        order_index BIGINT,
        noun_type TEXT,
        verb_type TEXT,
        comparison TEXT
    );

    CREATE TABLE IF NOT EXISTS examples (
        id BIGSERIAL PRIMARY KEY,
        meaning_id BIGINT NOT NULL REFERENCES meanings(id) ON DELETE CASCADE,
        sentence TEXT NOT NULL,
        translation TEXT,
        is_context_sentence BIGINT NOT NULL DEFAULT 0,
        order_index BIGINT
    );

    CREATE TABLE IF NOT EXISTS lemma_cache (
        id BIGSERIAL PRIMARY KEY,
        word TEXT NOT NULL,
        lemma TEXT NOT NULL,
        target_language TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT,
        hit_count BIGINT NOT NULL DEFAULT 0,
        UNIQUE(word, target_language)
    );
"#;

/// The entry uniqueness key: case-folded headword, language pair, context-or-empty
const UNIQUE_ENTRY_KEY: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_unique_key
    ON entries (LOWER(headword), source_language, target_language, COALESCE(context_sentence, ''))
"#;

/// Upsert target for the lemma cache; tables created before the inline constraint lack it
const UNIQUE_CACHE_KEY: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_lemma_cache_key
    ON lemma_cache (word, target_language)
"#;

/// An additive column migration
struct ColumnMigration {
    table: &'static str,
    column: &'static str,
    sqlite_type: &'static str,
    postgres_type: &'static str,
    /// Fills the new column for rows written before it existed
    backfill: Option<&'static str>,
}

const COLUMN_MIGRATIONS: &[ColumnMigration] = &[
    ColumnMigration {
        table: "entries",
        column: "definition_language",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        backfill: Some(
            "UPDATE entries SET definition_language = target_language WHERE definition_language IS NULL",
        ),
    },
    ColumnMigration {
        table: "entries",
        column: "has_context",
        sqlite_type: "INTEGER NOT NULL DEFAULT 0",
        postgres_type: "BIGINT NOT NULL DEFAULT 0",
        backfill: Some(
            "UPDATE entries SET has_context = 1 \
             WHERE context_sentence IS NOT NULL AND context_sentence <> ''",
        ),
    },
    ColumnMigration {
        table: "entries",
        column: "updated_at",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        backfill: Some("UPDATE entries SET updated_at = created_at WHERE updated_at IS NULL"),
    },
    ColumnMigration {
        table: "meanings",
        column: "order_index",
        sqlite_type: "INTEGER",
        postgres_type: "BIGINT",
        // Legacy rows get their position from insertion order within the entry
        backfill: Some(
            "UPDATE meanings SET order_index = ( \
                 SELECT COUNT(*) FROM meanings AS earlier \
                 WHERE earlier.entry_id = meanings.entry_id AND earlier.id < meanings.id \
             ) WHERE order_index IS NULL",
        ),
    },
    ColumnMigration {
        table: "meanings",
        column: "noun_type",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        backfill: None,
    },
    ColumnMigration {
        table: "meanings",
        column: "verb_type",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        backfill: None,
    },
    ColumnMigration {
        table: "meanings",
        column: "comparison",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        backfill: None,
    },
    ColumnMigration {
        table: "examples",
        column: "is_context_sentence",
        sqlite_type: "INTEGER NOT NULL DEFAULT 0",
        postgres_type: "BIGINT NOT NULL DEFAULT 0",
        backfill: None,
    },
    ColumnMigration {
        table: "examples",
        column: "order_index",
        sqlite_type: "INTEGER",
        postgres_type: "BIGINT",
        backfill: Some(
            "UPDATE examples SET order_index = ( \
                 SELECT COUNT(*) FROM examples AS earlier \
                 WHERE earlier.meaning_id = examples.meaning_id AND earlier.id < examples.id \
             ) WHERE order_index IS NULL",
        ),
    },
    ColumnMigration {
        table: "lemma_cache",
        column: "expires_at",
        sqlite_type: "TEXT",
        postgres_type: "TEXT",
        // Rows cached before expiry tracking are treated as already expired
        backfill: Some("UPDATE lemma_cache SET expires_at = created_at WHERE expires_at IS NULL"),
    },
    ColumnMigration {
        table: "lemma_cache",
        column: "hit_count",
        sqlite_type: "INTEGER NOT NULL DEFAULT 0",
        postgres_type: "BIGINT NOT NULL DEFAULT 0",
        backfill: None,
    },
];

/// A best-effort index, created only when its required column exists
struct IndexDefinition {
    name: &'static str,
    sql: &'static str,
    requires: Option<(&'static str, &'static str)>,
}

const INDEXES: &[IndexDefinition] = &[
    IndexDefinition {
        name: "idx_entries_lookup",
        sql: "CREATE INDEX IF NOT EXISTS idx_entries_lookup \
              ON entries(headword, source_language, target_language)",
        requires: None,
    },
    IndexDefinition {
        name: "idx_entries_headword_nocase",
        sql: "CREATE INDEX IF NOT EXISTS idx_entries_headword_nocase \
              ON entries(LOWER(headword), source_language, target_language)",
        requires: None,
    },
    IndexDefinition {
        name: "idx_entries_browse",
        sql: "CREATE INDEX IF NOT EXISTS idx_entries_browse \
              ON entries(source_language, target_language, created_at)",
        requires: None,
    },
    IndexDefinition {
        name: "idx_entries_context",
        sql: "CREATE INDEX IF NOT EXISTS idx_entries_context \
              ON entries(headword, source_language, target_language) WHERE has_context = 1",
        requires: Some(("entries", "has_context")),
    },
    IndexDefinition {
        name: "idx_meanings_entry_order",
        sql: "CREATE INDEX IF NOT EXISTS idx_meanings_entry_order ON meanings(entry_id, order_index)",
        requires: Some(("meanings", "order_index")),
    },
    IndexDefinition {
        name: "idx_examples_meaning_order",
        sql: "CREATE INDEX IF NOT EXISTS idx_examples_meaning_order ON examples(meaning_id, order_index)",
        requires: Some(("examples", "order_index")),
    },
    IndexDefinition {
        name: "idx_lemma_cache_lookup",
        sql: "CREATE INDEX IF NOT EXISTS idx_lemma_cache_lookup \
              ON lemma_cache(word, target_language, expires_at)",
        requires: Some(("lemma_cache", "expires_at")),
    },
];

/// Create the four tables if they are absent. Failure here is fatal.
pub async fn create_tables(backend: &dyn Backend) -> Result<()> {
    let ddl = match backend.dialect() {
        Dialect::Sqlite => SQLITE_TABLES,
        Dialect::Postgres => POSTGRES_TABLES,
    };

    backend
        .execute_batch(ddl)
        .await
        .context("Failed to create tables")?;

    debug!("Tables ready on {}", backend.describe());
    Ok(())
}

async fn apply_column_migration(backend: &dyn Backend, migration: &ColumnMigration) -> Result<bool> {
    if backend.column_exists(migration.table, migration.column).await? {
        return Ok(false);
    }

    let column_type = match backend.dialect() {
        Dialect::Sqlite => migration.sqlite_type,
        Dialect::Postgres => migration.postgres_type,
    };

    let mut tx = backend.begin().await?;
    tx.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            migration.table, migration.column, column_type
        ),
        &[],
    )
    .await?;

    if let Some(backfill) = migration.backfill {
        let filled = tx.execute(backfill, &[]).await?;
        debug!(
            "Backfilled {} row(s) of {}.{}",
            filled, migration.table, migration.column
        );
    }

    tx.commit().await?;
    Ok(true)
}

/// Run every additive migration.
///
/// Each migration is independent and transactional; a failure is logged and
/// recorded as a warning, and the remaining migrations still run.
pub async fn run_migrations(backend: &dyn Backend) -> StepReport {
    let mut report = StepReport::default();

    for migration in COLUMN_MIGRATIONS {
        let name = format!("{}.{}", migration.table, migration.column);
        match apply_column_migration(backend, migration).await {
            Ok(true) => {
                info!("Migrated schema: added column {}", name);
                report.applied.push(name);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Migration for {} skipped: {:#}", name, e);
                report.warnings.push(format!("migration {}: {:#}", name, e));
            }
        }
    }

    // Existing duplicate rows would make a unique index fail; keep running without it
    for (name, sql) in [
        ("idx_entries_unique_key", UNIQUE_ENTRY_KEY),
        ("idx_lemma_cache_key", UNIQUE_CACHE_KEY),
    ] {
        if let Err(e) = backend.execute(sql, &[]).await {
            warn!("Unique index {} not created: {:#}", name, e);
            report.warnings.push(format!("index {}: {:#}", name, e));
        }
    }

    report
}

/// Create lookup indexes on the embedded backend, each attempted independently
pub async fn create_indexes(backend: &dyn Backend) -> StepReport {
    let mut report = StepReport::default();

    for index in INDEXES {
        if let Some((table, column)) = index.requires {
            match backend.column_exists(table, column).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Skipping index {}: {}.{} is missing", index.name, table, column);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping index {}: {:#}", index.name, e);
                    report.warnings.push(format!("index {}: {:#}", index.name, e));
                    continue;
                }
            }
        }

        let existed = match backend
            .query_count(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                &[Value::from(index.name)],
            )
            .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Skipping index {}: {:#}", index.name, e);
                report.warnings.push(format!("index {}: {:#}", index.name, e));
                continue;
            }
        };

        // Only a newly created index counts as a schema change
        match backend.execute(index.sql, &[]).await {
            Ok(_) if existed => debug!("Index {} already present", index.name),
            Ok(_) => report.applied.push(index.name.to_string()),
            Err(e) => {
                warn!("Failed to create index {}: {:#}", index.name, e);
                report.warnings.push(format!("index {}: {:#}", index.name, e));
            }
        }
    }

    report
}

/// Performance pragmas for the embedded backend
pub fn tuning_pragmas(tuning: &SqliteTuning) -> String {
    format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -{};
         PRAGMA temp_store = MEMORY;
         PRAGMA mmap_size = {};
         PRAGMA busy_timeout = {};
         PRAGMA foreign_keys = ON;",
        tuning.cache_size_kib, tuning.mmap_size_bytes, tuning.busy_timeout_ms
    )
}

/// Apply the embedded tuning pragmas
pub async fn apply_tuning(backend: &dyn Backend, tuning: &SqliteTuning) -> Result<()> {
    backend
        .execute_batch(&tuning_pragmas(tuning))
        .await
        .context("Failed to apply performance pragmas")
}

/// Drop all tables (for testing purposes only)
#[cfg(test)]
pub async fn drop_all_tables(backend: &dyn Backend) -> Result<()> {
    backend
        .execute_batch(
            r#"
            DROP TABLE IF EXISTS examples;
            DROP TABLE IF EXISTS meanings;
            DROP TABLE IF EXISTS entries;
            DROP TABLE IF EXISTS lemma_cache;
            "#,
        )
        .await
}
