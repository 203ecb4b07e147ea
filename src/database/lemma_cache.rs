/*!
 * Lemma cache.
 *
 * Memoizes canonical word forms computed by the external lemmatizer. Every
 * write resets the row's lifetime to the configured TTL; an expired row is
 * a miss, exactly like an absent one. Diagnostics combine what is stored
 * (row ages, per-row hit counts) with the hits and misses observed by this
 * process.
 */

use anyhow::{Context, Result};
use chrono::Duration;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::backend::{now_timestamp, timestamp_from_now, Backend};
use super::connection::{Database, DatabaseManager};
use super::models::LemmaMapping;
use crate::app_config::{CacheConfig, MAX_TTL_HOURS};
use crate::args;
use crate::errors::{DatabaseError, DbResult};

/// Rows older than this count as stale in health checks
pub const STALE_AFTER_DAYS: i64 = 7;

/// Cache size above which a health warning is raised
pub const MAX_HEALTHY_ROWS: i64 = 10_000;

/// Hit rate below which a health warning is raised
pub const MIN_HEALTHY_HIT_RATE: f64 = 0.7;

/// Separator between word and context in context-aware keys
const CONTEXT_SEPARATOR: &str = "::";

/// Stored cache counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub active_entries: i64,
    pub expired_entries: i64,
    /// Sum of per-row hit counters
    pub total_hits: i64,
    /// Stored hits over stored hits plus rows written (each row cost one lemmatizer call)
    pub hit_rate_estimate: f64,
}

/// Row ages, by creation time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgeDistribution {
    pub last_hour: i64,
    pub last_day: i64,
    pub last_week: i64,
    pub older: i64,
}

/// Detailed cache diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub stats: CacheStats,
    pub age_distribution: AgeDistribution,
    pub rows_per_language: BTreeMap<String, i64>,
    /// Lookups answered from the cache since this repository was created
    pub session_hits: u64,
    pub session_misses: u64,
    pub session_hit_rate: Option<f64>,
}

impl CacheMetrics {
    /// Observed hit rate if there were lookups, otherwise the stored estimate
    pub fn effective_hit_rate(&self) -> f64 {
        self.session_hit_rate.unwrap_or(self.stats.hit_rate_estimate)
    }
}

/// Advisory health verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub warnings: Vec<String>,
    pub metrics: CacheMetrics,
}

/// Repository for the lemma cache
#[derive(Clone)]
pub struct LemmaCacheRepository {
    manager: Arc<DatabaseManager>,
    ttl: Duration,
    context_chars: usize,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl LemmaCacheRepository {
    /// Repository with the default 24 hour TTL
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self::with_config(manager, &CacheConfig::default())
    }

    /// Repository using the configured TTL, clamped to `0..=MAX_TTL_HOURS`
    pub fn with_config(manager: Arc<DatabaseManager>, config: &CacheConfig) -> Self {
        Self {
            manager,
            ttl: Duration::hours(config.ttl_hours.clamp(0, MAX_TTL_HOURS)),
            context_chars: config.context_snippet_chars,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Override the TTL (a zero or negative TTL makes every write expire immediately)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn database(&self) -> DbResult<Arc<Database>> {
        self.manager.database()
    }

    fn normalize(word: &str) -> String {
        word.trim().to_lowercase()
    }

    /// Store a lemma, resetting its expiry to now + TTL
    pub async fn cache_lemma(&self, word: &str, lemma: &str, target_language: &str) -> DbResult<()> {
        let db = self.database()?;
        Self::upsert(&db, &Self::normalize(word), lemma, target_language, self.ttl)
            .await
            .map_err(DatabaseError::write)?;

        debug!("Cached lemma '{}' -> '{}' ({})", word, lemma, target_language);
        Ok(())
    }

    async fn upsert(db: &Database, word: &str, lemma: &str, target_language: &str, ttl: Duration) -> Result<()> {
        db.backend()
            .execute(
                db.statements().cache_set,
                &args![
                    word,
                    lemma.trim(),
                    target_language,
                    now_timestamp(),
                    timestamp_from_now(ttl),
                ],
            )
            .await
            .with_context(|| format!("Failed to cache lemma for '{}'", word))?;
        Ok(())
    }

    /// Cached lemma if present and unexpired
    pub async fn get_cached_lemma(&self, word: &str, target_language: &str) -> DbResult<Option<String>> {
        let db = self.database()?;
        let word = Self::normalize(word);

        let found = db
            .backend()
            .query_opt(
                db.statements().cache_get,
                &args![word.as_str(), target_language, now_timestamp()],
            )
            .await
            .and_then(|row| row.map(|row| row.get::<String>(0)).transpose());

        let lemma = match found {
            Ok(lemma) => lemma,
            Err(e) => {
                error!("Lemma cache lookup for '{}' failed: {:#}", word, e);
                None
            }
        };

        match &lemma {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = db
                    .backend()
                    .execute(db.statements().cache_hit, &args![word.as_str(), target_language])
                    .await
                {
                    warn!("Failed to record cache hit for '{}': {:#}", word, e);
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(lemma)
    }

    /// Composite key of a word and the first characters of its sentence
    pub fn context_key(&self, word: &str, context: &str) -> String {
        let snippet: String = context.trim().chars().take(self.context_chars).collect();
        if snippet.is_empty() {
            Self::normalize(word)
        } else {
            format!("{}{}{}", Self::normalize(word), CONTEXT_SEPARATOR, snippet)
        }
    }

    /// Cache a lemma that depends on the sentence it was found in
    pub async fn cache_lemma_in_context(
        &self,
        word: &str,
        context: &str,
        lemma: &str,
        target_language: &str,
    ) -> DbResult<()> {
        self.cache_lemma(&self.context_key(word, context), lemma, target_language)
            .await
    }

    pub async fn get_cached_lemma_in_context(
        &self,
        word: &str,
        context: &str,
        target_language: &str,
    ) -> DbResult<Option<String>> {
        self.get_cached_lemma(&self.context_key(word, context), target_language)
            .await
    }

    /// Delete expired rows and return how many were removed.
    ///
    /// A cache table without an expiry column has nothing to sweep.
    pub async fn clear_expired_lemma_cache(&self) -> DbResult<u64> {
        let db = self.database()?;
        let backend = db.backend();

        let sweep = async {
            if !backend.column_exists("lemma_cache", "expires_at").await? {
                debug!("lemma_cache has no expires_at column, nothing to sweep");
                return Ok(0);
            }
            backend
                .execute(
                    "DELETE FROM lemma_cache WHERE expires_at <= ?1",
                    &args![now_timestamp()],
                )
                .await
        };

        match sweep.await {
            Ok(removed) => {
                info!("Removed {} expired lemma cache row(s)", removed);
                Ok(removed)
            }
            Err(e) => {
                error!("Failed to clear expired lemma cache: {:#}", e);
                Ok(0)
            }
        }
    }

    /// Stored totals and a hit-rate estimate
    pub async fn get_cache_stats(&self) -> DbResult<CacheStats> {
        let db = self.database()?;

        Ok(Self::collect_stats(db.backend()).await.unwrap_or_else(|e| {
            error!("Failed to read cache statistics: {:#}", e);
            CacheStats::default()
        }))
    }

    async fn collect_stats(backend: &dyn Backend) -> Result<CacheStats> {
        let total_entries = backend
            .query_count("SELECT COUNT(*) FROM lemma_cache", &[])
            .await
            .context("Failed to count cache rows")?;

        let active_entries = if backend.column_exists("lemma_cache", "expires_at").await? {
            backend
                .query_count(
                    "SELECT COUNT(*) FROM lemma_cache WHERE expires_at > ?1",
                    &args![now_timestamp()],
                )
                .await
                .context("Failed to count active cache rows")?
        } else {
            0
        };

        let total_hits = if backend.column_exists("lemma_cache", "hit_count").await? {
            backend
                .query_count(
                    "SELECT CAST(COALESCE(SUM(hit_count), 0) AS BIGINT) FROM lemma_cache",
                    &[],
                )
                .await
                .context("Failed to sum cache hits")?
        } else {
            0
        };

        let lookups = total_hits + total_entries;
        let hit_rate_estimate = if lookups > 0 {
            total_hits as f64 / lookups as f64
        } else {
            0.0
        };

        Ok(CacheStats {
            total_entries,
            active_entries,
            expired_entries: total_entries - active_entries,
            total_hits,
            hit_rate_estimate,
        })
    }

    /// Stored statistics plus age distribution, per-language counts and session counters
    pub async fn get_cache_metrics(&self) -> DbResult<CacheMetrics> {
        let db = self.database()?;
        let backend = db.backend();

        let collect = async {
            let stats = Self::collect_stats(backend).await?;

            let row = backend
                .query_opt(
                    r#"
                    SELECT
                        SUM(CASE WHEN created_at >= ?1 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN created_at >= ?2 THEN 1 ELSE 0 END),
                        SUM(CASE WHEN created_at >= ?3 THEN 1 ELSE 0 END)
                    FROM lemma_cache
                    "#,
                    &args![
                        timestamp_from_now(-Duration::hours(1)),
                        timestamp_from_now(-Duration::days(1)),
                        timestamp_from_now(-Duration::days(STALE_AFTER_DAYS)),
                    ],
                )
                .await
                .context("Failed to bucket cache ages")?;

            let bucket = |idx: usize| -> Result<i64> {
                match &row {
                    Some(row) => Ok(row.get::<Option<i64>>(idx)?.unwrap_or(0)),
                    None => Ok(0),
                }
            };
            let (hour, day, week) = (bucket(0)?, bucket(1)?, bucket(2)?);
            let age_distribution = AgeDistribution {
                last_hour: hour,
                last_day: day - hour,
                last_week: week - day,
                older: stats.total_entries - week,
            };

            let rows = backend
                .query(
                    "SELECT target_language, COUNT(*) FROM lemma_cache GROUP BY target_language",
                    &[],
                )
                .await
                .context("Failed to count cache rows per language")?;
            let mut rows_per_language = BTreeMap::new();
            for row in &rows {
                rows_per_language.insert(row.get::<String>(0)?, row.get::<i64>(1)?);
            }

            Ok::<_, anyhow::Error>((stats, age_distribution, rows_per_language))
        };

        let session_hits = self.hits.load(Ordering::Relaxed);
        let session_misses = self.misses.load(Ordering::Relaxed);
        let lookups = session_hits + session_misses;
        let session_hit_rate = (lookups > 0).then(|| session_hits as f64 / lookups as f64);

        let (stats, age_distribution, rows_per_language) = collect.await.unwrap_or_else(|e| {
            error!("Failed to read cache metrics: {:#}", e);
            Default::default()
        });

        Ok(CacheMetrics {
            stats,
            age_distribution,
            rows_per_language,
            session_hits,
            session_misses,
            session_hit_rate,
        })
    }

    /// Heuristic health check; warnings are advisory
    pub async fn check_cache_health(&self) -> DbResult<CacheHealth> {
        let metrics = self.get_cache_metrics().await?;
        let mut warnings = Vec::new();
        let total = metrics.stats.total_entries;

        if total > 0 && metrics.age_distribution.older * 2 > total {
            warnings.push(format!(
                "{} of {} cached lemmas are older than {} days",
                metrics.age_distribution.older, total, STALE_AFTER_DAYS
            ));
        }

        if total > MAX_HEALTHY_ROWS {
            warnings.push(format!(
                "cache holds {} rows (more than {})",
                total, MAX_HEALTHY_ROWS
            ));
        }

        let has_traffic = metrics.session_hit_rate.is_some() || total > 0;
        let hit_rate = metrics.effective_hit_rate();
        if has_traffic && hit_rate < MIN_HEALTHY_HIT_RATE {
            warnings.push(format!(
                "hit rate {:.1}% is below {:.0}%",
                hit_rate * 100.0,
                MIN_HEALTHY_HIT_RATE * 100.0
            ));
        }

        for warning in &warnings {
            warn!("Lemma cache health: {}", warning);
        }

        Ok(CacheHealth {
            healthy: warnings.is_empty(),
            warnings,
            metrics,
        })
    }

    /// Cache many lemmas; failures are logged and skipped.
    ///
    /// Returns how many were stored.
    pub async fn bulk_cache_lemmas(&self, mappings: &[LemmaMapping]) -> DbResult<usize> {
        let db = self.database()?;
        let mut stored = 0;

        for mapping in mappings {
            match Self::upsert(
                &db,
                &Self::normalize(&mapping.word),
                &mapping.lemma,
                &mapping.target_language,
                self.ttl,
            )
            .await
            {
                Ok(()) => stored += 1,
                Err(e) => warn!("Skipping lemma for '{}': {:#}", mapping.word, e),
            }
        }

        info!("Bulk cached {}/{} lemma(s)", stored, mappings.len());
        Ok(stored)
    }
}
