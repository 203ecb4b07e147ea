/*!
 * Search over stored entries.
 *
 * Ranked headword search, filtered browsing, full-text lookups inside
 * meanings and examples, autocomplete and similarity candidates. Search
 * is a best-effort read path: a failing query is logged and produces an
 * empty result (total 0) instead of an error. Only using the repository
 * before initialization is reported to the caller.
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::backend::{
    contains_pattern, format_timestamp, prefix_pattern, suffix_pattern, timestamp_from_now, Backend,
    Value,
};
use super::connection::{Database, DatabaseManager};
use super::entries::{ids_from_rows, load_entries};
use super::models::{Entry, EntryPage, PartOfSpeech};
use crate::args;
use crate::errors::DbResult;

/// Terms up to this many characters are matched by prefix only
pub const SHORT_TERM_CHARS: usize = 2;

/// Window counted as "recent" in `get_search_stats`
pub const STATS_RECENT_DAYS: i64 = 7;

/// Characters compared by `get_similar_entries`
const SIMILARITY_FRAGMENT_CHARS: usize = 3;

/// Basic search filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
}

impl SearchFilters {
    pub fn term(term: impl Into<String>) -> Self {
        Self {
            search_term: Some(term.into()),
            ..Self::default()
        }
    }

    pub fn with_languages(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_language = Some(source.into());
        self.target_language = Some(target.into());
        self
    }
}

/// Filters accepted by `advanced_search`; every supplied filter must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedSearchFilters {
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    /// Matches a plain tag or membership in a stored tag list
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub has_context: Option<bool>,
    /// Inclusive lower bound on creation time
    #[serde(default)]
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time
    #[serde(default)]
    pub created_to: Option<DateTime<Utc>>,
}

impl From<&SearchFilters> for AdvancedSearchFilters {
    fn from(filters: &SearchFilters) -> Self {
        Self {
            search_term: filters.search_term.clone(),
            source_language: filters.source_language.clone(),
            target_language: filters.target_language.clone(),
            ..Self::default()
        }
    }
}

/// Aggregate counts over the filtered entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchStats {
    pub total_entries: i64,
    pub context_entries: i64,
    /// Entries created within the last 7 days
    pub recent_entries: i64,
    /// Entries per part-of-speech tag; multi-tag entries count once per tag
    pub part_of_speech: BTreeMap<String, i64>,
}

/// A normalized, non-empty search term
fn normalized_term(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// LIKE pattern for a term: prefix only for short terms, substring otherwise
fn match_pattern(term: &str) -> String {
    if term.chars().count() <= SHORT_TERM_CHARS {
        prefix_pattern(term)
    } else {
        contains_pattern(term)
    }
}

/// Prefix, suffix and middle fragments used for similarity matching
fn similarity_fragments(word: &str) -> (String, String, String) {
    let chars: Vec<char> = word.chars().collect();
    let n = chars.len();
    let take = SIMILARITY_FRAGMENT_CHARS.min(n);

    let prefix: String = chars[..take].iter().collect();
    let suffix: String = chars[n - take..].iter().collect();
    let middle: String = if n > SIMILARITY_FRAGMENT_CHARS + 1 {
        let start = (n - SIMILARITY_FRAGMENT_CHARS) / 2;
        chars[start..start + SIMILARITY_FRAGMENT_CHARS].iter().collect()
    } else {
        word.to_string()
    };

    (prefix, suffix, middle)
}

/// WHERE conditions with numbered bound values
#[derive(Debug, Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    /// Bind a value and return its placeholder
    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn language_pair(&mut self, source: Option<&str>, target: Option<&str>) {
        if let Some(source) = source {
            let p = self.bind(source);
            self.push(format!("source_language = {}", p));
        }
        if let Some(target) = target {
            let p = self.bind(target);
            self.push(format!("target_language = {}", p));
        }
    }
}

/// Repository for search operations
#[derive(Clone)]
pub struct SearchRepository {
    manager: Arc<DatabaseManager>,
}

impl SearchRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    fn database(&self) -> DbResult<Arc<Database>> {
        self.manager.database()
    }

    /// Ranked, paginated headword search.
    ///
    /// With a term: exact matches first, then prefix matches, then
    /// substring matches, alphabetical within each tier. Without a term the
    /// results are plain alphabetical. `page` is 1-based.
    pub async fn search_entries(
        &self,
        filters: &SearchFilters,
        page: usize,
        page_size: usize,
    ) -> DbResult<EntryPage> {
        let db = self.database()?;
        let page = page.max(1);
        let page_size = page_size.max(1);

        let result = match normalized_term(filters.search_term.as_deref()) {
            Some(term) => {
                Self::ranked_search(&db, filters, &term, page, page_size).await
            }
            None => {
                Self::filtered_search(db.backend(), &AdvancedSearchFilters::from(filters), page, page_size)
                    .await
            }
        };

        Ok(result.unwrap_or_else(|e| {
            error!("Search failed for {:?}: {:#}", filters, e);
            EntryPage::empty(page, page_size)
        }))
    }

    async fn ranked_search(
        db: &Database,
        filters: &SearchFilters,
        term: &str,
        page: usize,
        page_size: usize,
    ) -> Result<EntryPage> {
        let statements = db.statements();
        let prefix = prefix_pattern(term);
        let pattern = match_pattern(term);
        let source = filters.source_language.as_deref();
        let target = filters.target_language.as_deref();

        let total = db
            .backend()
            .query_count(
                statements.ranked_search_count,
                &args![source, target, prefix.as_str(), pattern.as_str()],
            )
            .await
            .context("Failed to count search results")?;

        let rows = db
            .backend()
            .query(
                statements.ranked_search,
                &args![
                    source,
                    target,
                    prefix.as_str(),
                    pattern.as_str(),
                    term,
                    page_size,
                    EntryPage::offset(page, page_size),
                ],
            )
            .await
            .context("Failed to run ranked search")?;
        let entries = load_entries(db.backend(), &ids_from_rows(&rows)?).await?;

        debug!("Search '{}' matched {} entries in total", term, total);
        Ok(EntryPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    /// Search combining every supplied filter with AND semantics.
    ///
    /// `page` is 1-based.
    pub async fn advanced_search(
        &self,
        filters: &AdvancedSearchFilters,
        page: usize,
        page_size: usize,
    ) -> DbResult<EntryPage> {
        let db = self.database()?;
        let page = page.max(1);
        let page_size = page_size.max(1);

        Ok(Self::filtered_search(db.backend(), filters, page, page_size)
            .await
            .unwrap_or_else(|e| {
                error!("Advanced search failed for {:?}: {:#}", filters, e);
                EntryPage::empty(page, page_size)
            }))
    }

    async fn filtered_search(
        backend: &dyn Backend,
        filters: &AdvancedSearchFilters,
        page: usize,
        page_size: usize,
    ) -> Result<EntryPage> {
        let mut conditions = Conditions::default();
        conditions.language_pair(
            filters.source_language.as_deref(),
            filters.target_language.as_deref(),
        );

        let term = normalized_term(filters.search_term.as_deref());
        let mut prefix_placeholder = None;
        if let Some(term) = &term {
            let prefix = conditions.bind(prefix_pattern(term));
            let pattern = conditions.bind(match_pattern(term));
            conditions.push(format!(
                "(LOWER(headword) LIKE {prefix} ESCAPE '\\' OR LOWER(headword) LIKE {pattern} ESCAPE '\\')"
            ));
            prefix_placeholder = Some(prefix);
        }

        if let Some(pos) = filters
            .part_of_speech
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let exact = conditions.bind(pos.to_lowercase());
            let member = conditions.bind(contains_pattern(&format!("\"{}\"", pos)));
            conditions.push(format!(
                "(LOWER(part_of_speech) = {exact} OR LOWER(part_of_speech) LIKE {member} ESCAPE '\\')"
            ));
        }

        if let Some(has_context) = filters.has_context {
            let p = conditions.bind(has_context);
            conditions.push(format!("has_context = {}", p));
        }
        if let Some(from) = filters.created_from {
            let p = conditions.bind(format_timestamp(from));
            conditions.push(format!("created_at >= {}", p));
        }
        if let Some(to) = filters.created_to {
            let p = conditions.bind(format_timestamp(to));
            conditions.push(format!("created_at <= {}", p));
        }

        let where_clause = conditions.where_clause();
        let total = backend
            .query_count(
                &format!("SELECT COUNT(*) FROM entries {}", where_clause),
                &conditions.params,
            )
            .await
            .context("Failed to count filtered entries")?;

        // Bound after counting: the count query never references the ranking value
        let mut order = "LOWER(headword), id".to_string();
        if let (Some(term), Some(prefix)) = (&term, &prefix_placeholder) {
            let exact = conditions.bind(term.as_str());
            order = format!(
                "CASE WHEN LOWER(headword) = {exact} THEN 0 \
                 WHEN LOWER(headword) LIKE {prefix} ESCAPE '\\' THEN 1 ELSE 2 END, {order}"
            );
        }
        let limit = conditions.bind(page_size);
        let offset = conditions.bind(EntryPage::offset(page, page_size));
        let sql = format!(
            "SELECT id FROM entries {} ORDER BY {} LIMIT {} OFFSET {}",
            where_clause, order, limit, offset
        );
        let rows = backend
            .query(&sql, &conditions.params)
            .await
            .context("Failed to run filtered search")?;
        let entries = load_entries(backend, &ids_from_rows(&rows)?).await?;

        Ok(EntryPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    /// Entries whose definitions, example sentences or translations contain `term`.
    ///
    /// Each entry appears once, alphabetically.
    pub async fn search_content(
        &self,
        term: &str,
        source_language: Option<&str>,
        target_language: Option<&str>,
        limit: usize,
    ) -> DbResult<Vec<Entry>> {
        let db = self.database()?;
        let Some(term) = normalized_term(Some(term)) else {
            return Ok(Vec::new());
        };

        let search = async {
            let rows = db
                .backend()
                .query(
                    r#"
                    SELECT e.id FROM entries e
                    WHERE e.id IN (
                        SELECT m.entry_id FROM meanings m
                        LEFT JOIN examples x ON x.meaning_id = m.id
                        WHERE LOWER(m.definition) LIKE ?1 ESCAPE '\'
                           OR LOWER(x.sentence) LIKE ?1 ESCAPE '\'
                           OR LOWER(COALESCE(x.translation, '')) LIKE ?1 ESCAPE '\'
                    )
                      AND e.source_language = COALESCE(?2, e.source_language)
                      AND e.target_language = COALESCE(?3, e.target_language)
                    ORDER BY LOWER(e.headword), e.id
                    LIMIT ?4
                    "#,
                    &args![contains_pattern(&term), source_language, target_language, limit],
                )
                .await
                .context("Failed to search meanings and examples")?;
            load_entries(db.backend(), &ids_from_rows(&rows)?).await
        };

        Ok(search.await.unwrap_or_else(|e| {
            error!("Content search for '{}' failed: {:#}", term, e);
            Vec::new()
        }))
    }

    /// Distinct headwords starting with `partial`, alphabetical, for autocomplete
    pub async fn get_search_suggestions(
        &self,
        partial: &str,
        source_language: Option<&str>,
        target_language: Option<&str>,
        limit: usize,
    ) -> DbResult<Vec<String>> {
        let db = self.database()?;
        let Some(partial) = normalized_term(Some(partial)) else {
            return Ok(Vec::new());
        };

        let suggestions = async {
            let rows = db
                .backend()
                .query(
                    r#"
                    SELECT headword FROM entries
                    WHERE LOWER(headword) LIKE ?1 ESCAPE '\'
                      AND source_language = COALESCE(?2, source_language)
                      AND target_language = COALESCE(?3, target_language)
                    GROUP BY headword
                    ORDER BY LOWER(headword), headword
                    LIMIT ?4
                    "#,
                    &args![prefix_pattern(&partial), source_language, target_language, limit],
                )
                .await?;
            rows.iter().map(|row| row.get::<String>(0)).collect::<Result<Vec<_>>>()
        };

        Ok(suggestions.await.unwrap_or_else(|e| {
            error!("Suggestions for '{}' failed: {:#}", partial, e);
            Vec::new()
        }))
    }

    /// Entries sharing a prefix, suffix or inner fragment with `headword`.
    ///
    /// The headword itself is excluded. Prefix matches come first, then
    /// candidates closest in length.
    pub async fn get_similar_entries(
        &self,
        headword: &str,
        source_language: Option<&str>,
        target_language: Option<&str>,
        limit: usize,
    ) -> DbResult<Vec<Entry>> {
        let db = self.database()?;
        let Some(word) = normalized_term(Some(headword)) else {
            return Ok(Vec::new());
        };
        let (prefix, suffix, middle) = similarity_fragments(&word);

        let similar = async {
            let rows = db
                .backend()
                .query(
                    r#"
                    SELECT id FROM entries
                    WHERE LOWER(headword) <> ?1
                      AND source_language = COALESCE(?2, source_language)
                      AND target_language = COALESCE(?3, target_language)
                      AND (LOWER(headword) LIKE ?4 ESCAPE '\'
                           OR LOWER(headword) LIKE ?5 ESCAPE '\'
                           OR LOWER(headword) LIKE ?6 ESCAPE '\')
                    ORDER BY
                        CASE WHEN LOWER(headword) LIKE ?4 ESCAPE '\' THEN 0 ELSE 1 END,
                        ABS(LENGTH(headword) - ?7),
                        LOWER(headword),
                        id
                    LIMIT ?8
                    "#,
                    &args![
                        word.as_str(),
                        source_language,
                        target_language,
                        prefix_pattern(&prefix),
                        suffix_pattern(&suffix),
                        contains_pattern(&middle),
                        word.chars().count(),
                        limit,
                    ],
                )
                .await
                .context("Failed to query similar entries")?;
            load_entries(db.backend(), &ids_from_rows(&rows)?).await
        };

        Ok(similar.await.unwrap_or_else(|e| {
            error!("Similar entries for '{}' failed: {:#}", headword, e);
            Vec::new()
        }))
    }

    /// Totals and part-of-speech histogram for the optional language pair
    pub async fn get_search_stats(
        &self,
        source_language: Option<&str>,
        target_language: Option<&str>,
    ) -> DbResult<SearchStats> {
        let db = self.database()?;

        Ok(Self::collect_stats(db.backend(), source_language, target_language)
            .await
            .unwrap_or_else(|e| {
                error!("Search statistics failed: {:#}", e);
                SearchStats::default()
            }))
    }

    async fn collect_stats(
        backend: &dyn Backend,
        source_language: Option<&str>,
        target_language: Option<&str>,
    ) -> Result<SearchStats> {
        const PAIR: &str = "source_language = COALESCE(?1, source_language) \
                            AND target_language = COALESCE(?2, target_language)";
        let pair = args![source_language, target_language];

        let total_entries = backend
            .query_count(&format!("SELECT COUNT(*) FROM entries WHERE {}", PAIR), &pair)
            .await
            .context("Failed to count entries")?;
        let context_entries = backend
            .query_count(
                &format!("SELECT COUNT(*) FROM entries WHERE {} AND has_context = 1", PAIR),
                &pair,
            )
            .await
            .context("Failed to count contextual entries")?;

        let mut recent_params = pair.clone();
        recent_params.push(timestamp_from_now(-Duration::days(STATS_RECENT_DAYS)).into());
        let recent_entries = backend
            .query_count(
                &format!("SELECT COUNT(*) FROM entries WHERE {} AND created_at >= ?3", PAIR),
                &recent_params,
            )
            .await
            .context("Failed to count recent entries")?;

        let rows = backend
            .query(
                &format!(
                    "SELECT part_of_speech, COUNT(*) FROM entries \
                     WHERE {} AND part_of_speech IS NOT NULL GROUP BY part_of_speech",
                    PAIR
                ),
                &pair,
            )
            .await
            .context("Failed to group parts of speech")?;

        let mut part_of_speech = BTreeMap::new();
        for row in &rows {
            let raw: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            for tag in PartOfSpeech::from_storage(&raw).tags() {
                let tag = tag.trim();
                if !tag.is_empty() {
                    *part_of_speech.entry(tag.to_string()).or_insert(0) += count;
                }
            }
        }

        Ok(SearchStats {
            total_entries,
            context_entries,
            recent_entries,
            part_of_speech,
        })
    }
}
