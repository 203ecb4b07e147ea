/*!
 * Common test utilities for the lexistore test suite
 */

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use lexistore::app_config::DatabaseConfig;
use lexistore::database::{DatabaseManager, Entry, Example, Meaning, PartOfSpeech};

/// Route engine logs to the test output; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test databases
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Embedded configuration pointing at `path`
pub fn file_config(path: &Path) -> DatabaseConfig {
    DatabaseConfig {
        path: path.to_path_buf(),
        ..DatabaseConfig::default()
    }
}

/// An initialized manager over a private in-memory database
pub async fn memory_manager() -> Arc<DatabaseManager> {
    init_logging();
    let manager = Arc::new(DatabaseManager::in_memory());
    manager
        .ensure_initialized()
        .await
        .expect("Failed to initialize in-memory database");
    manager
}

/// The two-meaning "run" entry used across tests
pub fn run_entry() -> Entry {
    Entry::new("run", "English", "Czech")
        .with_part_of_speech(PartOfSpeech::Multiple(vec![
            "verb".to_string(),
            "noun".to_string(),
        ]))
        .with_meaning(
            Meaning::new("to move fast on foot")
                .with_example(Example::new("He runs every morning.").with_translation("Každé ráno běhá.")),
        )
        .with_meaning(Meaning::new("to manage/operate").with_example(Example::new("She runs the company.")))
}

/// A one-meaning entry for bulk fixtures
pub fn simple_entry(headword: &str) -> Entry {
    Entry::new(headword, "English", "Czech")
        .with_meaning(Meaning::new(format!("definition of {}", headword)))
}
