/*!
 * File-backed persistence: data survives restarts and legacy files are upgraded
 */

use std::sync::Arc;

use lexistore::database::{DatabaseManager, EntryRepository, LemmaCacheRepository};

use crate::common;

const LEGACY_SCHEMA: &str = r#"
    CREATE TABLE entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        headword TEXT NOT NULL,
        part_of_speech TEXT,
        source_language TEXT NOT NULL,
        target_language TEXT NOT NULL,
        context_sentence TEXT,
        created_at TEXT NOT NULL
    );
    CREATE TABLE meanings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
        definition TEXT NOT NULL
    );
    CREATE TABLE examples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        meaning_id INTEGER NOT NULL REFERENCES meanings(id) ON DELETE CASCADE,
        sentence TEXT NOT NULL,
        translation TEXT
    );
    CREATE TABLE lemma_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        word TEXT NOT NULL,
        lemma TEXT NOT NULL,
        target_language TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    INSERT INTO entries (headword, part_of_speech, source_language, target_language, created_at)
        VALUES ('house', 'noun', 'English', 'Czech', '2024-03-01T10:00:00.000Z');
    INSERT INTO meanings (entry_id, definition) VALUES (1, 'a building for people to live in');
    INSERT INTO meanings (entry_id, definition) VALUES (1, 'a family line');
    INSERT INTO examples (meaning_id, sentence, translation) VALUES (1, 'They bought a house.', 'Koupili dům.');
    INSERT INTO examples (meaning_id, sentence) VALUES (1, 'The house is empty.');
    INSERT INTO lemma_cache (word, lemma, target_language, created_at)
        VALUES ('houses', 'house', 'Czech', '2024-03-01T10:00:00.000Z');
"#;

#[tokio::test]
async fn test_fileDatabase_afterReopen_shouldKeepEntries() -> anyhow::Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("dictionary.db");

    let id = {
        let manager = Arc::new(DatabaseManager::new(common::file_config(&path)));
        manager.ensure_initialized().await?;
        let entries = EntryRepository::new(manager.clone());
        let id = entries.add_entry(&common::run_entry()).await?.expect("entry inserted");
        manager.close().await;
        id
    };

    assert!(path.exists());

    let manager = Arc::new(DatabaseManager::new(common::file_config(&path)));
    let db = manager.ensure_initialized().await?;
    assert!(db.init_report().applied.is_empty(), "reopen should not migrate anything");

    let entries = EntryRepository::new(manager.clone());
    let stored = entries.get_entry_by_id(id).await?.expect("entry survives restart");
    assert_eq!(stored.headword, "run");
    assert_eq!(stored.meanings.len(), 2);
    assert_eq!(stored.meanings[0].definition, "to move fast on foot");
    assert_eq!(
        stored.meanings[0].examples[0].translation.as_deref(),
        Some("Každé ráno běhá.")
    );

    manager.close().await;
    Ok(())
}

#[tokio::test]
async fn test_legacyFile_onInitialize_shouldMigrateAndKeepData() -> anyhow::Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("legacy.db");
    {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(LEGACY_SCHEMA)?;
    }

    let manager = Arc::new(DatabaseManager::new(common::file_config(&path)));
    let db = manager.ensure_initialized().await?;

    let applied = &db.init_report().applied;
    assert!(applied.contains(&"meanings.order_index".to_string()));
    assert!(applied.contains(&"entries.definition_language".to_string()));
    assert!(applied.contains(&"lemma_cache.expires_at".to_string()));

    let entries = EntryRepository::new(manager.clone());
    let house = entries
        .get_entry_by_headword("HOUSE", "English", "Czech")
        .await?
        .expect("legacy entry readable");
    assert_eq!(house.definition_language.as_deref(), Some("Czech"));
    assert_eq!(house.meanings.len(), 2);
    assert_eq!(house.meanings[0].definition, "a building for people to live in");
    assert_eq!(house.meanings[1].definition, "a family line");
    let sentences: Vec<&str> = house.meanings[0]
        .examples
        .iter()
        .map(|e| e.sentence.as_str())
        .collect();
    assert_eq!(sentences, vec!["They bought a house.", "The house is empty."]);

    // Rows cached before expiry tracking existed are already stale
    let cache = LemmaCacheRepository::new(manager.clone());
    assert_eq!(cache.get_cached_lemma("houses", "Czech").await?, None);
    assert_eq!(cache.clear_expired_lemma_cache().await?, 1);

    // The upgraded cache accepts new writes
    cache.cache_lemma("houses", "house", "Czech").await?;
    assert_eq!(cache.get_cached_lemma("houses", "Czech").await?.as_deref(), Some("house"));

    // New entries land next to legacy ones
    assert!(entries.add_entry(&common::simple_entry("home")).await?.is_some());
    assert_eq!(manager.stats().await?.entries, 2);

    manager.close().await;
    Ok(())
}

#[tokio::test]
async fn test_legacyFile_initializedTwice_shouldOnlyMigrateOnce() -> anyhow::Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("legacy.db");
    {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(LEGACY_SCHEMA)?;
    }

    let first = DatabaseManager::new(common::file_config(&path));
    assert!(!first.ensure_initialized().await?.init_report().applied.is_empty());
    first.close().await;

    let second = DatabaseManager::new(common::file_config(&path));
    let db = second.ensure_initialized().await?;
    assert!(db.init_report().applied.is_empty());
    assert!(db.init_report().is_clean(), "warnings: {:?}", db.init_report().warnings);

    let stats = second.stats().await?;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.meanings, 2);
    assert_eq!(stats.examples, 2);

    second.close().await;
    Ok(())
}

#[tokio::test]
async fn test_closedManager_shouldReinitializeOnDemand() -> anyhow::Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("reopen.db");

    let manager = Arc::new(DatabaseManager::new(common::file_config(&path)));
    let entries = EntryRepository::new(manager.clone());

    manager.ensure_initialized().await?;
    entries.add_entry(&common::simple_entry("door")).await?;
    manager.close().await;

    assert!(!manager.is_initialized());
    assert!(entries.get_entry_by_headword("door", "English", "Czech").await.is_err());

    manager.ensure_initialized().await?;
    assert!(entries
        .get_entry_by_headword("door", "English", "Czech")
        .await?
        .is_some());

    manager.close().await;
    Ok(())
}
