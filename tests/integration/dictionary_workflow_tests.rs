/*!
 * End-to-end dictionary workflows over one in-memory database
 */

use chrono::Duration;

use lexistore::database::{
    AdvancedSearchFilters, EntryRepository, LemmaCacheRepository, LemmaMapping, Meaning,
    PartOfSpeech, SearchFilters, SearchRepository,
};

use crate::common;

#[tokio::test]
async fn test_runEntry_storedOnce_shouldBeFoundEverywhere() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let entries = EntryRepository::new(manager.clone());
    let search = SearchRepository::new(manager.clone());

    let id = entries.add_entry(&common::run_entry()).await?.expect("first insert");
    for headword in ["runner", "rust", "truck"] {
        entries.add_entry(&common::simple_entry(headword)).await?;
    }

    let stored = entries
        .get_entry_by_headword("RUN", "English", "Czech")
        .await?
        .expect("case-insensitive lookup");
    assert_eq!(stored.id, id);
    assert_eq!(stored.definition_language.as_deref(), Some("Czech"));
    assert_eq!(
        stored.part_of_speech,
        Some(PartOfSpeech::Multiple(vec!["verb".to_string(), "noun".to_string()]))
    );
    assert_eq!(stored.meanings[0].definition, "to move fast on foot");
    assert_eq!(stored.meanings[1].definition, "to manage/operate");
    assert_eq!(stored.meanings[1].examples[0].sentence, "She runs the company.");

    // Two characters: prefix matches only, exact match first
    let page = search
        .search_entries(&SearchFilters::term("ru").with_languages("English", "Czech"), 1, 10)
        .await?;
    let headwords: Vec<&str> = page.entries.iter().map(|e| e.headword.as_str()).collect();
    assert_eq!(headwords, vec!["run", "runner", "rust"]);
    assert_eq!(page.total, 3);

    let exact = search
        .search_entries(&SearchFilters::term("run"), 1, 10)
        .await?;
    assert_eq!(exact.entries[0].headword, "run");
    assert!(exact.entries.iter().all(|e| e.headword != "truck"));

    let suggestions = search
        .get_search_suggestions("ru", Some("English"), Some("Czech"), 5)
        .await?;
    assert_eq!(suggestions, vec!["run", "runner", "rust"]);

    let by_content = search
        .search_content("company", Some("English"), Some("Czech"), 10)
        .await?;
    assert_eq!(by_content.len(), 1);
    assert_eq!(by_content[0].headword, "run");

    let verbs = search
        .advanced_search(
            &AdvancedSearchFilters {
                part_of_speech: Some("verb".to_string()),
                ..AdvancedSearchFilters::default()
            },
            1,
            10,
        )
        .await?;
    assert_eq!(verbs.total, 1);
    assert_eq!(verbs.entries[0].headword, "run");

    let stats = search.get_search_stats(Some("English"), Some("Czech")).await?;
    assert_eq!(stats.total_entries, 4);
    assert_eq!(stats.recent_entries, 4);
    assert_eq!(stats.part_of_speech.get("verb"), Some(&1));
    assert_eq!(stats.part_of_speech.get("noun"), Some(&1));

    Ok(())
}

#[tokio::test]
async fn test_entryLifecycle_updateThenDelete_shouldLeaveNoRows() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let entries = EntryRepository::new(manager.clone());
    let search = SearchRepository::new(manager.clone());

    let id = entries.add_entry(&common::run_entry()).await?.expect("inserted");

    let mut revised = common::run_entry();
    revised.meanings = vec![Meaning::new("to flow, as a liquid")];
    assert!(entries.update_entry(id, &revised).await?);

    let stored = entries.get_entry_by_id(id).await?.expect("still stored");
    assert_eq!(stored.meanings.len(), 1);
    assert_eq!(stored.meanings[0].definition, "to flow, as a liquid");
    assert!(search
        .search_content("company", None, None, 10)
        .await?
        .is_empty());

    assert!(entries.delete_entry("Run", Some("English"), None).await?);
    assert!(!entries.entry_exists("run", "English", "Czech", None).await?);
    assert!(!entries.delete_entry("run", None, None).await?);

    let stats = manager.stats().await?;
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.meanings, 0);
    assert_eq!(stats.examples, 0);

    Ok(())
}

#[tokio::test]
async fn test_languageBrowsing_shouldPageAndListPairs() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let entries = EntryRepository::new(manager.clone());

    for headword in ["alpha", "beta", "gamma", "delta", "epsilon"] {
        entries.add_entry(&common::simple_entry(headword)).await?;
    }
    let mut german = common::simple_entry("haus");
    german.source_language = "German".to_string();
    german.target_language = "English".to_string();
    entries.add_entry(&german).await?;

    let first = entries.get_entries_for_languages("English", "Czech", 1, 2).await?;
    let third = entries.get_entries_for_languages("English", "Czech", 3, 2).await?;
    assert_eq!(first.total, 5);
    assert_eq!(first.entries.len(), 2);
    assert_eq!(third.entries.len(), 1);

    let recent = entries.get_recent_entries("German", "English", 10).await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].headword, "haus");

    assert_eq!(
        entries.get_all_languages().await?,
        vec!["Czech".to_string(), "English".to_string(), "German".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn test_lemmaCache_withMaintenance_shouldServeFreshAndDropExpired() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let cache = LemmaCacheRepository::new(manager.clone());
    let expired = LemmaCacheRepository::new(manager.clone()).with_ttl(Duration::hours(-1));

    cache.cache_lemma("Running", "run", "English").await?;
    cache
        .cache_lemma_in_context("saw", "I saw the film yesterday.", "see", "English")
        .await?;
    expired.cache_lemma("went", "go", "English").await?;

    assert_eq!(cache.get_cached_lemma("running", "English").await?.as_deref(), Some("run"));
    assert_eq!(
        cache
            .get_cached_lemma_in_context("saw", "I saw the film yesterday.", "English")
            .await?
            .as_deref(),
        Some("see")
    );
    assert_eq!(cache.get_cached_lemma("saw", "English").await?, None);
    assert_eq!(cache.get_cached_lemma("went", "English").await?, None);

    let stats = cache.get_cache_stats().await?;
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.expired_entries, 1);
    assert_eq!(stats.total_hits, 2);

    let report = manager.run_maintenance().await;
    assert_eq!(report.expired_cache_rows, 1);
    assert!(report.statistics_refreshed);
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);

    let stored = cache
        .bulk_cache_lemmas(&[
            LemmaMapping::new("mice", "mouse", "English"),
            LemmaMapping::new("geese", "goose", "English"),
        ])
        .await?;
    assert_eq!(stored, 2);

    let metrics = cache.get_cache_metrics().await?;
    assert_eq!(metrics.stats.total_entries, 4);
    assert_eq!(metrics.age_distribution.last_hour, 4);
    assert_eq!(metrics.rows_per_language.get("English"), Some(&4));
    assert_eq!(metrics.session_hits, 2);
    assert_eq!(metrics.session_misses, 2);

    let health = cache.check_cache_health().await?;
    assert_eq!(health.metrics.stats.total_entries, 4);

    Ok(())
}
