/*!
 * # lexistore - dictionary persistence and retrieval engine
 *
 * Stores language-learning dictionary entries (headword, part of speech,
 * meanings, examples) produced by an external generator and serves them
 * back through lookups, ranked search and a short-lived lemma cache.
 *
 * ## Features
 *
 * - Two interchangeable backends:
 *   - Embedded SQLite file (local use, tuned with WAL and memory-mapped I/O)
 *   - Remote PostgreSQL (hosted use, behind the `remote` feature)
 * - Idempotent, single-flight initialization with additive migrations
 * - Transactional writes of the entry → meaning → example tree
 * - Ranked search (exact, prefix, substring), filters, suggestions, similarity
 * - Lemma cache with TTL expiry, hit tracking and health heuristics
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management and backend selection
 * - `database`: Storage engine:
 *   - `database::backend`: Backend interface and portable values
 *   - `database::sqlite` / `database::postgres`: Backend adapters
 *   - `database::schema`: Tables, migrations, indexes and tuning
 *   - `database::connection`: The connection manager
 *   - `database::entries`: Entry repository
 *   - `database::search`: Search repository
 *   - `database::lemma_cache`: Lemma cache repository
 * - `errors`: Custom error types for the engine
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod database;
pub mod errors;

// Re-export main types for easier usage
pub use app_config::{BackendKind, CacheConfig, Config, DatabaseConfig};
pub use database::{
    DatabaseManager, Entry, EntryRepository, Example, LemmaCacheRepository, Meaning,
    PartOfSpeech, SearchRepository,
};
pub use errors::{DatabaseError, DbResult};
