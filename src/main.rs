// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lexistore::app_config::{self, Config};
use lexistore::database::{
    AdvancedSearchFilters, DatabaseManager, Entry, EntryRepository, LemmaCacheRepository,
    SearchFilters, SearchRepository,
};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Language pair filter shared by most commands
#[derive(clap::Args, Debug, Clone)]
struct LanguageArgs {
    /// Source language (e.g., 'English')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language (e.g., 'Czech')
    #[arg(short, long)]
    target_language: Option<String>,
}

impl LanguageArgs {
    /// Both languages, or an error naming the missing one
    fn require_pair(&self) -> Result<(&str, &str)> {
        let source = self
            .source_language
            .as_deref()
            .ok_or_else(|| anyhow!("--source-language is required for this command"))?;
        let target = self
            .target_language
            .as_deref()
            .ok_or_else(|| anyhow!("--target-language is required for this command"))?;
        Ok((source, target))
    }
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Look up a cached lemma
    Get {
        word: String,
        /// Target language of the lemma
        language: String,
        /// Sentence the word appeared in
        #[arg(long)]
        context: Option<String>,
    },

    /// Store a lemma
    Set {
        word: String,
        lemma: String,
        language: String,
        #[arg(long)]
        context: Option<String>,
    },

    /// Delete expired rows
    Sweep,

    /// Show stored statistics and detailed metrics
    Stats,

    /// Run the heuristic health check
    Health,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database, run migrations and report warnings
    Init,

    /// Add an entry from a JSON file ('-' reads stdin)
    Add {
        #[arg(value_name = "JSON")]
        json: PathBuf,
    },

    /// Show an entry by headword or id
    Show {
        /// Headword to look up (case-insensitive)
        #[arg(required_unless_present = "id")]
        headword: Option<String>,

        #[arg(long, conflicts_with = "headword")]
        id: Option<i64>,

        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// Delete entries by headword
    Delete {
        headword: String,

        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// Browse a language pair, newest first
    List {
        #[command(flatten)]
        languages: LanguageArgs,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Entries created in the last 30 days
    Recent {
        #[command(flatten)]
        languages: LanguageArgs,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Ranked headword search with optional advanced filters
    Search {
        term: Option<String>,

        #[command(flatten)]
        languages: LanguageArgs,

        /// Part of speech tag
        #[arg(long)]
        pos: Option<String>,

        /// Only context-anchored (true) or context-free (false) entries
        #[arg(long)]
        context: Option<bool>,

        /// Created on or after (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Created on or before (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        to: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Search inside definitions and examples
    Content {
        term: String,

        #[command(flatten)]
        languages: LanguageArgs,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Autocomplete headwords
    Suggest {
        partial: String,

        #[command(flatten)]
        languages: LanguageArgs,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Headwords resembling the given one
    Similar {
        headword: String,

        #[command(flatten)]
        languages: LanguageArgs,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Table counts and search statistics
    Stats {
        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// Languages present in storage
    Languages,

    /// Lemma cache operations
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Sweep expired cache rows and refresh planner statistics
    Maintain {
        /// Keep running on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Generate shell completions for lexistore
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// lexistore - dictionary entry store for language learning
///
/// Persists AI-generated dictionary entries (headword, meanings, examples)
/// and serves lookups, ranked search and a lemma cache.
#[derive(Parser, Debug)]
#[command(name = "lexistore")]
#[command(version)]
#[command(about = "Dictionary persistence and retrieval engine")]
#[command(long_about = "lexistore stores dictionary entries in an embedded SQLite file or a remote PostgreSQL database.

EXAMPLES:
    lexistore init                                   # Create the schema
    lexistore add run.json                           # Add an entry from a JSON file
    lexistore show run -s English -t Czech           # Show an entry
    lexistore search ru -s English -t Czech          # Ranked search
    lexistore search --pos verb --context true       # Filtered search
    lexistore cache get ran English                  # Cached lemma lookup
    lexistore completions bash > lexistore.bash      # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. LEXISTORE_DATABASE_URL (or
    DATABASE_URL) selects the remote backend; LEXISTORE_ENV=production requires it.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: String,

    /// Embedded database file (overrides configuration)
    #[arg(long, env = "LEXISTORE_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color and tag for log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "ERROR"),
            Level::Warn => ("1;33", "WARN "),
            Level::Info => ("1;32", "INFO "),
            Level::Debug => ("1;36", "DEBUG"),
            Level::Trace => ("1;35", "TRACE"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (color, tag) = Self::style_for_level(record.level());

            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                color,
                now,
                tag,
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // The logger accepts everything; the effective level is lowered with set_max_level once config is loaded
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "lexistore", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;
    log::set_max_level(config.log_level.to_level_filter());

    let manager = Arc::new(DatabaseManager::new(config.database.clone()));
    let db = manager
        .ensure_initialized()
        .await
        .context("Failed to initialize the database")?;

    if let Commands::Init = cli.command {
        print_json(db.init_report())?;
        manager.close().await;
        return Ok(());
    }

    let result = run_command(cli.command, &manager, &config).await;
    manager.close().await;
    result
}

/// Load configuration, creating a default file if none exists, then apply env and CLI overrides
fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let config_path = &cli.config_path;
    let mut config = if Path::new(config_path).exists() {
        Config::from_file(config_path)?
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);
        let config = Config::default();
        config.save(config_path)?;
        config
    };

    config.apply_env();
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone().into();
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// Parse a date filter; date-only upper bounds cover the whole day
fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD or RFC 3339", raw))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| anyhow!("Invalid time of day"))?;

    Ok(date.and_time(time).and_utc())
}

fn read_entry(path: &Path) -> Result<Entry> {
    let mut raw = String::new();
    if path.as_os_str() == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read entry from stdin")?;
    } else {
        raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read entry file: {:?}", path))?;
    }
    serde_json::from_str(&raw).context("Entry JSON does not match the expected shape")
}

async fn run_command(command: Commands, manager: &Arc<DatabaseManager>, config: &Config) -> Result<()> {
    let entries = EntryRepository::new(manager.clone());
    let search = SearchRepository::new(manager.clone());
    let cache = LemmaCacheRepository::with_config(manager.clone(), &config.cache);

    match command {
        Commands::Init | Commands::Completions { .. } => {}

        Commands::Add { json } => {
            let entry = read_entry(&json)?;
            match entries.add_entry(&entry).await? {
                Some(id) => info!("Added '{}' with id {}", entry.headword, id),
                None => warn!("'{}' already exists, nothing added", entry.headword),
            }
        }

        Commands::Show { headword, id, languages } => {
            let entry = match (id, headword) {
                (Some(id), _) => entries.get_entry_by_id(id).await?,
                (None, Some(headword)) => {
                    let (source, target) = languages.require_pair()?;
                    entries.get_entry_by_headword(&headword, source, target).await?
                }
                (None, None) => return Err(anyhow!("Either a headword or --id is required")),
            };
            match entry {
                Some(entry) => print_json(&entry)?,
                None => warn!("Entry not found"),
            }
        }

        Commands::Delete { headword, languages } => {
            let removed = entries
                .delete_entry(
                    &headword,
                    languages.source_language.as_deref(),
                    languages.target_language.as_deref(),
                )
                .await?;
            if removed {
                info!("Deleted '{}'", headword);
            } else {
                warn!("No entry matched '{}'", headword);
            }
        }

        Commands::List { languages, page, page_size } => {
            let (source, target) = languages.require_pair()?;
            print_json(&entries.get_entries_for_languages(source, target, page, page_size).await?)?;
        }

        Commands::Recent { languages, limit } => {
            let (source, target) = languages.require_pair()?;
            print_json(&entries.get_recent_entries(source, target, limit).await?)?;
        }

        Commands::Search { term, languages, pos, context, from, to, page, page_size } => {
            let advanced = pos.is_some() || context.is_some() || from.is_some() || to.is_some();
            let page = if advanced {
                let filters = AdvancedSearchFilters {
                    search_term: term,
                    source_language: languages.source_language,
                    target_language: languages.target_language,
                    part_of_speech: pos,
                    has_context: context,
                    created_from: from.as_deref().map(|d| parse_date_bound(d, false)).transpose()?,
                    created_to: to.as_deref().map(|d| parse_date_bound(d, true)).transpose()?,
                };
                search.advanced_search(&filters, page, page_size).await?
            } else {
                let filters = SearchFilters {
                    search_term: term,
                    source_language: languages.source_language,
                    target_language: languages.target_language,
                };
                search.search_entries(&filters, page, page_size).await?
            };
            print_json(&page)?;
        }

        Commands::Content { term, languages, limit } => {
            let found = search
                .search_content(
                    &term,
                    languages.source_language.as_deref(),
                    languages.target_language.as_deref(),
                    limit,
                )
                .await?;
            print_json(&found)?;
        }

        Commands::Suggest { partial, languages, limit } => {
            let suggestions = search
                .get_search_suggestions(
                    &partial,
                    languages.source_language.as_deref(),
                    languages.target_language.as_deref(),
                    limit,
                )
                .await?;
            print_json(&suggestions)?;
        }

        Commands::Similar { headword, languages, limit } => {
            let similar = search
                .get_similar_entries(
                    &headword,
                    languages.source_language.as_deref(),
                    languages.target_language.as_deref(),
                    limit,
                )
                .await?;
            print_json(&similar)?;
        }

        Commands::Stats { languages } => {
            let tables = manager.stats().await?;
            info!("{}", tables);
            let stats = search
                .get_search_stats(
                    languages.source_language.as_deref(),
                    languages.target_language.as_deref(),
                )
                .await?;
            print_json(&serde_json::json!({ "tables": tables, "search": stats }))?;
        }

        Commands::Languages => {
            print_json(&entries.get_all_languages().await?)?;
        }

        Commands::Cache { command } => run_cache_command(command, &cache).await?,

        Commands::Maintain { watch } => {
            print_json(&manager.run_maintenance().await)?;

            if watch {
                let interval = Duration::from_secs(config.database.maintenance_interval_secs);
                info!("Running maintenance every {:?}, press Ctrl-C to stop", interval);
                let handle = manager.spawn_maintenance(interval);
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for Ctrl-C")?;
                handle.abort();
            }
        }
    }

    Ok(())
}

async fn run_cache_command(command: CacheCommands, cache: &LemmaCacheRepository) -> Result<()> {
    match command {
        CacheCommands::Get { word, language, context } => {
            let lemma = match context {
                Some(context) => cache.get_cached_lemma_in_context(&word, &context, &language).await?,
                None => cache.get_cached_lemma(&word, &language).await?,
            };
            match lemma {
                Some(lemma) => println!("{}", lemma),
                None => warn!("No cached lemma for '{}'", word),
            }
        }
        CacheCommands::Set { word, lemma, language, context } => {
            match context {
                Some(context) => {
                    cache
                        .cache_lemma_in_context(&word, &context, &lemma, &language)
                        .await?
                }
                None => cache.cache_lemma(&word, &lemma, &language).await?,
            }
            info!("Cached '{}' -> '{}'", word, lemma);
        }
        CacheCommands::Sweep => {
            let removed = cache.clear_expired_lemma_cache().await?;
            info!("Removed {} expired row(s)", removed);
        }
        CacheCommands::Stats => print_json(&cache.get_cache_metrics().await?)?,
        CacheCommands::Health => print_json(&cache.check_cache_health().await?)?,
    }
    Ok(())
}
