/*!
 * Entry persistence.
 *
 * Writes run inside a single backend transaction: the entry row, its
 * meanings and their examples either all land or none do. Reads rebuild
 * the nested tree from one flat join and never fail on a query error;
 * they log it and return nothing instead.
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::backend::{
    format_timestamp, now_timestamp, placeholders, timestamp_from_now, Backend,
    BackendTransaction, Row, Value,
};
use super::connection::{Database, DatabaseManager};
use super::models::{Entry, EntryPage, Example, Meaning, PartOfSpeech};
use super::statements::{Statements, ENTRY_TREE_COLUMNS, ENTRY_TREE_FROM, ENTRY_TREE_ORDER};
use crate::args;
use crate::errors::{DatabaseError, DbResult};

/// Window used by `get_recent_entries`
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Partially folded entry: meanings grouped by id, examples deduplicated
struct EntryFold {
    entry: Entry,
    meanings: IndexMap<i64, Meaning>,
    seen_examples: HashSet<(i64, i64)>,
}

impl EntryFold {
    fn finish(self) -> Entry {
        let mut entry = self.entry;
        entry.meanings = self.meanings.into_values().collect();
        entry
    }
}

fn entry_from_row(row: &Row) -> Result<Entry> {
    let part_of_speech = row
        .get::<Option<String>>(2)?
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| PartOfSpeech::from_storage(&raw));

    Ok(Entry {
        id: row.get(0)?,
        headword: row.get(1)?,
        part_of_speech,
        source_language: row.get(3)?,
        target_language: row.get(4)?,
        definition_language: row.get(5)?,
        has_context: row.get::<Option<bool>>(6)?.unwrap_or(false),
        context_sentence: row.get(7)?,
        meanings: Vec::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Fold entry-tree join rows into nested entries, in first-seen entry order.
///
/// Rows must be ordered by entry, meaning order and example order. A
/// meaning without examples and an entry without meanings come through
/// the left joins as NULL columns and yield empty lists.
pub fn fold_entries(rows: &[Row]) -> Result<Vec<Entry>> {
    let mut entries: IndexMap<i64, EntryFold> = IndexMap::new();

    for row in rows {
        let entry_id: i64 = row.get(0)?;
        let fold = entries.entry(entry_id).or_insert_with(|| EntryFold {
            entry: Entry::new("", "", ""),
            meanings: IndexMap::new(),
            seen_examples: HashSet::new(),
        });
        if fold.entry.id == 0 {
            fold.entry = entry_from_row(row)?;
        }

        let Some(meaning_id) = row.get::<Option<i64>>(10)? else {
            continue;
        };

        // Only a repeated example id is a join artifact
        let example_id = row
            .get::<Option<i64>>(16)?
            .filter(|&example_id| fold.seen_examples.insert((meaning_id, example_id)));

        let position = fold.meanings.len() as i64;
        let meaning = fold.meanings.entry(meaning_id).or_insert_with(|| Meaning {
            id: meaning_id,
            definition: String::new(),
            order_index: position,
            noun_type: None,
            verb_type: None,
            comparison: None,
            examples: Vec::new(),
        });
        if meaning.definition.is_empty() {
            meaning.definition = row.get(11)?;
            meaning.order_index = row.get::<Option<i64>>(12)?.unwrap_or(position);
            meaning.noun_type = row.get(13)?;
            meaning.verb_type = row.get(14)?;
            meaning.comparison = row.get(15)?;
        }

        if let Some(example_id) = example_id {
            let position = meaning.examples.len() as i64;
            meaning.examples.push(Example {
                id: example_id,
                sentence: row.get(17)?,
                translation: row.get(18)?,
                is_context_sentence: row.get::<Option<bool>>(19)?.unwrap_or(false),
                order_index: row.get::<Option<i64>>(20)?.unwrap_or(position),
            });
        }
    }

    Ok(entries.into_values().map(EntryFold::finish).collect())
}

/// Load full entry trees for `ids`, returned in the order of `ids`
pub(crate) async fn load_entries(backend: &dyn Backend, ids: &[i64]) -> Result<Vec<Entry>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} {} WHERE e.id IN ({}) {}",
        ENTRY_TREE_COLUMNS,
        ENTRY_TREE_FROM,
        placeholders(1, ids.len()),
        ENTRY_TREE_ORDER
    );
    let params: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();
    let rows = backend
        .query(&sql, &params)
        .await
        .context("Failed to load entry trees")?;

    let mut by_id: HashMap<i64, Entry> = fold_entries(&rows)?
        .into_iter()
        .map(|entry| (entry.id, entry))
        .collect();

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// First column of every row as an id
pub(crate) fn ids_from_rows(rows: &[Row]) -> Result<Vec<i64>> {
    rows.iter().map(|row| row.get::<i64>(0)).collect()
}

/// Normalize a caller-supplied timestamp to the stored format
fn stored_timestamp(raw: Option<&str>) -> DbResult<String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(now_timestamp()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| format_timestamp(at.with_timezone(&Utc)))
            .map_err(|e| DatabaseError::InvalidEntry(format!("invalid timestamp '{}': {}", raw, e))),
    }
}

/// Column values shared by insert and update, in `insert_entry` order minus timestamps
fn entry_columns(entry: &Entry) -> Vec<Value> {
    let context = entry.context_key();
    args![
        entry.headword.trim(),
        entry.part_of_speech.as_ref().map(PartOfSpeech::to_storage),
        entry.source_language.trim(),
        entry.target_language.trim(),
        entry.effective_definition_language(),
        entry.is_contextual(),
        (!context.is_empty()).then(|| context.to_string()),
    ]
}

/// Insert meanings and examples with zero-based positions from list order
async fn insert_tree(
    tx: &mut dyn BackendTransaction,
    statements: &Statements,
    entry_id: i64,
    meanings: &[Meaning],
) -> Result<()> {
    for (meaning_index, meaning) in meanings.iter().enumerate() {
        let meaning_id = tx
            .insert_returning_id(
                statements.insert_meaning,
                &args![
                    entry_id,
                    meaning.definition.as_str(),
                    meaning_index,
                    meaning.noun_type.as_deref(),
                    meaning.verb_type.as_deref(),
                    meaning.comparison.as_deref(),
                ],
            )
            .await
            .with_context(|| format!("Failed to insert meaning {}", meaning_index))?;

        for (example_index, example) in meaning.examples.iter().enumerate() {
            tx.execute(
                statements.insert_example,
                &args![
                    meaning_id,
                    example.sentence.as_str(),
                    example.translation.as_deref(),
                    example.is_context_sentence,
                    example_index,
                ],
            )
            .await
            .with_context(|| {
                format!("Failed to insert example {} of meaning {}", example_index, meaning_index)
            })?;
        }
    }
    Ok(())
}

/// Remove every meaning (and its examples) owned by `entry_id`
async fn delete_tree(tx: &mut dyn BackendTransaction, entry_id: i64) -> Result<()> {
    tx.execute(
        "DELETE FROM examples WHERE meaning_id IN (SELECT id FROM meanings WHERE entry_id = ?1)",
        &args![entry_id],
    )
    .await
    .context("Failed to delete examples")?;
    tx.execute("DELETE FROM meanings WHERE entry_id = ?1", &args![entry_id])
        .await
        .context("Failed to delete meanings")?;
    Ok(())
}

/// Commit on success, roll back on failure, and map the failure to a write error
async fn finish_write<T>(
    tx: Box<dyn BackendTransaction>,
    outcome: Result<T>,
    what: &str,
) -> DbResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .with_context(|| format!("Failed to commit {}", what))
                .map_err(DatabaseError::write)?;
            Ok(value)
        }
        Err(e) => {
            error!("{} failed, rolling back: {:#}", what, e);
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback after failed {} also failed: {:#}", what, rollback);
            }
            Err(DatabaseError::write(e))
        }
    }
}

/// Repository for dictionary entries
#[derive(Clone)]
pub struct EntryRepository {
    manager: Arc<DatabaseManager>,
}

impl EntryRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    fn database(&self) -> DbResult<Arc<Database>> {
        self.manager.database()
    }

    /// Persist an entry with its full meaning/example tree.
    ///
    /// Returns `None` when an entry with the same headword, language pair
    /// and context already exists.
    pub async fn add_entry(&self, entry: &Entry) -> DbResult<Option<i64>> {
        entry.validate()?;
        let created_at = stored_timestamp(entry.created_at.as_deref())?;
        let db = self.database()?;
        let statements = db.statements();

        let mut tx = db
            .backend()
            .begin()
            .await
            .map_err(DatabaseError::write)?;

        let outcome = async {
            let existing = tx
                .query_opt(
                    statements.find_by_key,
                    &args![
                        entry.headword.trim(),
                        entry.source_language.trim(),
                        entry.target_language.trim(),
                        entry.context_key(),
                    ],
                )
                .await
                .context("Failed to check for an existing entry")?;
            if existing.is_some() {
                return Ok(None);
            }

            let mut params = entry_columns(entry);
            params.push(created_at.clone().into());
            params.push(created_at.clone().into());
            let entry_id = tx
                .insert_returning_id(statements.insert_entry, &params)
                .await
                .with_context(|| format!("Failed to insert entry '{}'", entry.headword))?;

            insert_tree(tx.as_mut(), statements, entry_id, &entry.meanings).await?;
            Ok::<_, anyhow::Error>(Some(entry_id))
        }
        .await;

        let id = finish_write(tx, outcome, "add entry").await?;
        match id {
            Some(id) => info!(
                "Added entry '{}' ({} -> {}) with id {}",
                entry.headword, entry.source_language, entry.target_language, id
            ),
            None => debug!(
                "Entry '{}' ({} -> {}) already exists, skipping",
                entry.headword, entry.source_language, entry.target_language
            ),
        }
        Ok(id)
    }

    /// Case-insensitive lookup within a language pair; the newest entry wins
    pub async fn get_entry_by_headword(
        &self,
        headword: &str,
        source_language: &str,
        target_language: &str,
    ) -> DbResult<Option<Entry>> {
        let db = self.database()?;

        let lookup = async {
            let row = db
                .backend()
                .query_opt(
                    db.statements().lookup_by_headword,
                    &args![headword.trim(), source_language, target_language],
                )
                .await?;
            match row {
                Some(row) => Self::load_one(&db, row.get(0)?).await,
                None => Ok::<_, anyhow::Error>(None),
            }
        };

        Ok(lookup.await.unwrap_or_else(|e| {
            error!("Failed to look up entry '{}': {:#}", headword, e);
            None
        }))
    }

    /// Full entry tree by id
    pub async fn get_entry_by_id(&self, id: i64) -> DbResult<Option<Entry>> {
        let db = self.database()?;

        Ok(Self::load_one(&db, id).await.unwrap_or_else(|e| {
            error!("Failed to load entry {}: {:#}", id, e);
            None
        }))
    }

    async fn load_one(db: &Database, id: i64) -> Result<Option<Entry>> {
        let rows = db
            .backend()
            .query(db.statements().entry_tree, &args![id])
            .await
            .with_context(|| format!("Failed to query entry tree {}", id))?;
        Ok(fold_entries(&rows)?.into_iter().next())
    }

    /// Replace the entry's fields and its whole meaning/example tree.
    ///
    /// Returns `false` if no entry has this id.
    pub async fn update_entry(&self, id: i64, entry: &Entry) -> DbResult<bool> {
        entry.validate()?;
        let db = self.database()?;
        let statements = db.statements();

        let mut tx = db
            .backend()
            .begin()
            .await
            .map_err(DatabaseError::write)?;

        let outcome = async {
            let mut params = args![id];
            params.extend(entry_columns(entry));
            params.push(now_timestamp().into());

            let updated = tx
                .execute(
                    r#"
                    UPDATE entries SET
                        headword = ?2, part_of_speech = ?3, source_language = ?4,
                        target_language = ?5, definition_language = ?6, has_context = ?7,
                        context_sentence = ?8, updated_at = ?9
                    WHERE id = ?1
                    "#,
                    &params,
                )
                .await
                .with_context(|| format!("Failed to update entry {}", id))?;
            if updated == 0 {
                return Ok(false);
            }

            delete_tree(tx.as_mut(), id).await?;
            insert_tree(tx.as_mut(), statements, id, &entry.meanings).await?;
            Ok::<_, anyhow::Error>(true)
        }
        .await;

        let updated = finish_write(tx, outcome, "update entry").await?;
        if updated {
            info!("Updated entry {} ('{}')", id, entry.headword);
        } else {
            debug!("Update skipped: no entry with id {}", id);
        }
        Ok(updated)
    }

    /// Delete entries by headword, narrowed by whichever languages are given.
    ///
    /// Returns whether anything was removed.
    pub async fn delete_entry(
        &self,
        headword: &str,
        source_language: Option<&str>,
        target_language: Option<&str>,
    ) -> DbResult<bool> {
        let db = self.database()?;
        let mut tx = db
            .backend()
            .begin()
            .await
            .map_err(DatabaseError::write)?;

        const MATCHING_ENTRIES: &str = r#"
            SELECT id FROM entries
            WHERE LOWER(headword) = LOWER(?1)
              AND source_language = COALESCE(?2, source_language)
              AND target_language = COALESCE(?3, target_language)
        "#;
        let params = args![headword.trim(), source_language, target_language];

        let outcome = async {
            tx.execute(
                &format!(
                    "DELETE FROM examples WHERE meaning_id IN \
                     (SELECT id FROM meanings WHERE entry_id IN ({}))",
                    MATCHING_ENTRIES
                ),
                &params,
            )
            .await
            .context("Failed to delete examples")?;
            tx.execute(
                &format!("DELETE FROM meanings WHERE entry_id IN ({})", MATCHING_ENTRIES),
                &params,
            )
            .await
            .context("Failed to delete meanings")?;
            let removed = tx
                .execute(
                    &format!("DELETE FROM entries WHERE id IN ({})", MATCHING_ENTRIES),
                    &params,
                )
                .await
                .context("Failed to delete entries")?;
            Ok::<_, anyhow::Error>(removed)
        }
        .await;

        let removed = finish_write(tx, outcome, "delete entry").await?;
        info!("Deleted {} entry row(s) for '{}'", removed, headword);
        Ok(removed > 0)
    }

    /// One page of a language pair, newest first.
    ///
    /// `page` is 1-based; 0 is treated as the first page.
    pub async fn get_entries_for_languages(
        &self,
        source_language: &str,
        target_language: &str,
        page: usize,
        page_size: usize,
    ) -> DbResult<EntryPage> {
        let db = self.database()?;
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = EntryPage::offset(page, page_size);

        let browse = async {
            let backend = db.backend();
            let total = backend
                .query_count(
                    "SELECT COUNT(*) FROM entries WHERE source_language = ?1 AND target_language = ?2",
                    &args![source_language, target_language],
                )
                .await
                .context("Failed to count entries")?;

            let rows = backend
                .query(
                    r#"
                    SELECT id FROM entries
                    WHERE source_language = ?1 AND target_language = ?2
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?3 OFFSET ?4
                    "#,
                    &args![source_language, target_language, page_size, offset],
                )
                .await
                .context("Failed to page entries")?;
            let entries = load_entries(backend, &ids_from_rows(&rows)?).await?;

            Ok::<_, anyhow::Error>(EntryPage {
                entries,
                total,
                page,
                page_size,
            })
        };

        Ok(browse.await.unwrap_or_else(|e| {
            error!(
                "Failed to browse {} -> {} entries: {:#}",
                source_language, target_language, e
            );
            EntryPage::empty(page, page_size)
        }))
    }

    /// Entries created within the last 30 days, newest first
    pub async fn get_recent_entries(
        &self,
        source_language: &str,
        target_language: &str,
        limit: usize,
    ) -> DbResult<Vec<Entry>> {
        let db = self.database()?;
        let since = timestamp_from_now(-Duration::days(RECENT_WINDOW_DAYS));

        let recent = async {
            let rows = db
                .backend()
                .query(
                    r#"
                    SELECT id FROM entries
                    WHERE source_language = ?1 AND target_language = ?2 AND created_at >= ?3
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?4
                    "#,
                    &args![source_language, target_language, since.as_str(), limit],
                )
                .await
                .context("Failed to query recent entries")?;
            load_entries(db.backend(), &ids_from_rows(&rows)?).await
        };

        Ok(recent.await.unwrap_or_else(|e| {
            error!("Failed to load recent entries: {:#}", e);
            Vec::new()
        }))
    }

    /// Every language present as source, target or definition language, sorted
    pub async fn get_all_languages(&self) -> DbResult<Vec<String>> {
        let db = self.database()?;

        let languages = async {
            let rows = db
                .backend()
                .query(
                    r#"
                    SELECT source_language FROM entries
                    UNION
                    SELECT target_language FROM entries
                    UNION
                    SELECT definition_language FROM entries WHERE definition_language IS NOT NULL
                    "#,
                    &[],
                )
                .await?;

            let mut languages = rows
                .iter()
                .map(|row| row.get::<String>(0))
                .collect::<Result<Vec<_>>>()?;
            languages.retain(|l| !l.trim().is_empty());
            languages.sort();
            languages.dedup();
            Ok::<_, anyhow::Error>(languages)
        };

        Ok(languages.await.unwrap_or_else(|e| {
            error!("Failed to list languages: {:#}", e);
            Vec::new()
        }))
    }

    /// Whether an entry with this uniqueness key is stored
    pub async fn entry_exists(
        &self,
        headword: &str,
        source_language: &str,
        target_language: &str,
        context_sentence: Option<&str>,
    ) -> DbResult<bool> {
        let db = self.database()?;
        let context = context_sentence.map(str::trim).unwrap_or("");

        let found = db
            .backend()
            .query_opt(
                db.statements().find_by_key,
                &args![headword.trim(), source_language, target_language, context],
            )
            .await;

        match found {
            Ok(row) => Ok(row.is_some()),
            Err(e) => {
                error!("Failed to check entry '{}': {:#}", headword, e);
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for EntryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRepository")
            .field("initialized", &self.manager.is_initialized())
            .finish()
    }
}
