/*!
 * The remote backend against a live PostgreSQL server.
 *
 * Ignored by default. Run with a throwaway database:
 * `TEST_DATABASE_URL=postgres://... cargo test -- --ignored remote_backend`
 * Each test works in its own language pair so runs never collide.
 */

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lexistore::app_config::DatabaseConfig;
use lexistore::database::{
    DatabaseManager, Dialect, Entry, EntryRepository, Example, LemmaCacheRepository, Meaning,
    SearchFilters, SearchRepository, Value,
};

use crate::common;

const ENV_TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

fn remote_config() -> Option<DatabaseConfig> {
    let url = std::env::var(ENV_TEST_DATABASE_URL).ok()?;
    Some(DatabaseConfig {
        remote_url: Some(url),
        ..DatabaseConfig::default()
    })
}

async fn remote_manager() -> Option<Arc<DatabaseManager>> {
    common::init_logging();
    let Some(config) = remote_config() else {
        eprintln!("{} not set, skipping", ENV_TEST_DATABASE_URL);
        return None;
    };
    let manager = Arc::new(DatabaseManager::new(config));
    let db = manager
        .ensure_initialized()
        .await
        .expect("Failed to initialize remote database");
    assert_eq!(db.dialect(), Dialect::Postgres);
    Some(manager)
}

/// A language name no other test run uses
fn unique_language(tag: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}-{}", tag, std::process::id(), nanos)
}

#[tokio::test]
#[ignore] // requires TEST_DATABASE_URL
async fn test_remote_entryRoundTrip_shouldKeepTreeAndNulls() -> anyhow::Result<()> {
    let Some(manager) = remote_manager().await else {
        return Ok(());
    };
    let entries = EntryRepository::new(manager.clone());
    let source = unique_language("English");

    let entry = Entry::new("bank", source.as_str(), "Czech")
        .with_meaning(
            Meaning::new("a financial institution")
                .with_example(Example::new("Go to the bank.").with_translation("Jdi do banky."))
                .with_example(Example::new("Go to the bank.")),
        )
        .with_meaning(Meaning::new("the side of a river"));

    let id = entries.add_entry(&entry).await?.expect("first insert");
    assert_eq!(entries.add_entry(&entry).await?, None);

    let stored = entries
        .get_entry_by_headword("BANK", &source, "Czech")
        .await?
        .expect("case-insensitive lookup");
    assert_eq!(stored.id, id);
    assert_eq!(stored.part_of_speech, None);
    assert_eq!(stored.meanings.len(), 2);
    let examples = &stored.meanings[0].examples;
    assert_eq!(examples.len(), 2);
    assert_eq!(examples[0].translation.as_deref(), Some("Jdi do banky."));
    assert_eq!(examples[1].translation, None);
    assert!(stored.meanings[1].examples.is_empty());

    assert!(entries.delete_entry("bank", Some(source.as_str()), None).await?);
    assert!(entries.get_entry_by_id(id).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore] // requires TEST_DATABASE_URL
async fn test_remote_droppedTransaction_shouldRollBack() -> anyhow::Result<()> {
    let Some(manager) = remote_manager().await else {
        return Ok(());
    };
    let db = manager.database()?;
    let backend = db.backend();
    let table = format!("tx_check_{}", std::process::id());
    backend
        .execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id BIGSERIAL PRIMARY KEY, name TEXT)"
        ))
        .await?;

    {
        let mut tx = backend.begin().await?;
        tx.execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), &[Value::Null])
            .await?;
    }

    let count = backend
        .query_count(&format!("SELECT COUNT(*) FROM {table}"), &[])
        .await?;
    backend.execute_batch(&format!("DROP TABLE {table}")).await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
#[ignore] // requires TEST_DATABASE_URL
async fn test_remote_rankedSearch_shouldOrderTiers() -> anyhow::Result<()> {
    let Some(manager) = remote_manager().await else {
        return Ok(());
    };
    let entries = EntryRepository::new(manager.clone());
    let search = SearchRepository::new(manager.clone());
    let source = unique_language("English");

    for word in ["concatenate", "category", "cat", "dog", "50%_off"] {
        entries
            .add_entry(&Entry::new(word, source.as_str(), "Czech").with_meaning(Meaning::new("x")))
            .await?;
    }

    let page = search
        .search_entries(&SearchFilters::term("cat").with_languages(source.as_str(), "Czech"), 1, 10)
        .await?;
    let words: Vec<_> = page.entries.iter().map(|e| e.headword.as_str()).collect();
    assert_eq!(words, vec!["cat", "category", "concatenate"]);
    assert_eq!(page.total, 3);

    let literal = search
        .search_entries(&SearchFilters::term("50%_").with_languages(source.as_str(), "Czech"), 1, 10)
        .await?;
    assert_eq!(literal.total, 1);

    for word in ["concatenate", "category", "cat", "dog", "50%_off"] {
        entries.delete_entry(word, Some(source.as_str()), None).await?;
    }
    Ok(())
}

#[tokio::test]
#[ignore] // requires TEST_DATABASE_URL
async fn test_remote_secondInitialization_shouldMigrateNothing() -> anyhow::Result<()> {
    let Some(first) = remote_manager().await else {
        return Ok(());
    };
    first.close().await;

    let Some(second) = remote_manager().await else {
        return Ok(());
    };
    let db = second.database()?;
    assert!(db.init_report().applied.is_empty(), "applied: {:?}", db.init_report().applied);
    assert!(db.init_report().is_clean(), "warnings: {:?}", db.init_report().warnings);
    Ok(())
}

#[tokio::test]
#[ignore] // requires TEST_DATABASE_URL
async fn test_remote_cacheUpsert_shouldReplaceLemma() -> anyhow::Result<()> {
    let Some(manager) = remote_manager().await else {
        return Ok(());
    };
    let cache = LemmaCacheRepository::new(manager.clone());
    let language = unique_language("Czech");

    cache.cache_lemma("běžel", "běhat", &language).await?;
    cache.cache_lemma("běžel", "běžet", &language).await?;

    assert_eq!(cache.get_cached_lemma("Běžel", &language).await?, Some("běžet".to_string()));
    let metrics = cache.get_cache_metrics().await?;
    assert_eq!(metrics.session_hits, 1);
    assert_eq!(metrics.rows_per_language.get(&language), Some(&1));
    Ok(())
}
