/*!
 * Database module for the dictionary persistence engine.
 *
 * This module provides:
 * - A uniform backend interface with embedded (SQLite) and remote (PostgreSQL) adapters
 * - Schema creation, additive migrations, indexes and tuning
 * - Repositories for entries, search and the lemma cache
 */

pub mod backend;
pub mod connection;
pub mod entries;
pub mod lemma_cache;
pub mod models;
#[cfg(feature = "remote")]
pub mod postgres;
pub mod schema;
pub mod search;
pub mod sqlite;
pub mod statements;

// Re-export main types
pub use backend::{Backend, BackendTransaction, Dialect, Row, Value};
pub use connection::{Database, DatabaseManager, DatabaseStats};
pub use entries::EntryRepository;
pub use lemma_cache::{CacheHealth, CacheMetrics, CacheStats, LemmaCacheRepository};
pub use models::{Entry, EntryPage, Example, LemmaMapping, MaintenanceReport, Meaning, PartOfSpeech, StepReport};
pub use search::{AdvancedSearchFilters, SearchFilters, SearchRepository, SearchStats};
