/*!
 * Concurrent use of a single manager and its repositories
 */

use std::sync::Arc;

use futures::future::join_all;
use lexistore::database::{DatabaseManager, EntryRepository, LemmaCacheRepository};

use crate::common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ensureInitialized_calledConcurrently_shouldInitializeOnce() -> anyhow::Result<()> {
    common::init_logging();
    let manager = Arc::new(DatabaseManager::in_memory());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_initialized().await })
        })
        .collect();

    let databases = join_all(handles)
        .await
        .into_iter()
        .map(|joined| -> anyhow::Result<_> { Ok(joined??) })
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Every caller receives the same database instance
    for db in &databases[1..] {
        assert!(Arc::ptr_eq(&databases[0], db));
    }
    assert!(manager.is_initialized());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_addEntry_sameKeyConcurrently_shouldStoreOneRow() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let entries = EntryRepository::new(manager.clone());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let entries = entries.clone();
            tokio::spawn(async move { entries.add_entry(&common::run_entry()).await })
        })
        .collect();

    let mut inserted = 0;
    for joined in join_all(handles).await {
        if joined??.is_some() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    let stats = manager.stats().await?;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.meanings, 2);
    assert_eq!(stats.examples, 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixedWorkload_concurrently_shouldKeepEveryWrite() -> anyhow::Result<()> {
    let manager = common::memory_manager().await;
    let entries = EntryRepository::new(manager.clone());
    let cache = LemmaCacheRepository::new(manager.clone());

    let writers = (0..20).map(|i| {
        let entries = entries.clone();
        async move { entries.add_entry(&common::simple_entry(&format!("word{}", i))).await }
    });
    let cachers = (0..20).map(|i| {
        let cache = cache.clone();
        async move {
            cache
                .cache_lemma(&format!("words{}", i), &format!("word{}", i), "English")
                .await
        }
    });

    let (written, cached) = tokio::join!(join_all(writers), join_all(cachers));
    for result in written {
        assert!(result?.is_some());
    }
    for result in cached {
        result?;
    }

    let stats = manager.stats().await?;
    assert_eq!(stats.entries, 20);
    assert_eq!(stats.cached_lemmas, 20);
    assert_eq!(
        cache.get_cached_lemma("words7", "English").await?.as_deref(),
        Some("word7")
    );

    Ok(())
}
