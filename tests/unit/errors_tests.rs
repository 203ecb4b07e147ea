/*!
 * Tests for error types and conversions
 */

use anyhow::Context;
use lexistore::errors::DatabaseError;

#[test]
fn test_databaseError_connection_shouldDisplayCorrectly() {
    let error = DatabaseError::Connection("missing connection string".to_string());
    let display = format!("{}", error);
    assert!(display.contains("Connection error"));
    assert!(display.contains("missing connection string"));
}

#[test]
fn test_databaseError_invalidEntry_shouldDisplayCorrectly() {
    let error = DatabaseError::InvalidEntry("headword is empty".to_string());
    assert_eq!(error.to_string(), "Invalid entry: headword is empty");
}

#[test]
fn test_databaseError_read_shouldKeepContextChain() {
    let source: anyhow::Result<()> = Err(anyhow::anyhow!("no such table: entries"));
    let error = DatabaseError::read(source.context("Failed to load entry trees").unwrap_err());

    let display = error.to_string();
    assert!(display.starts_with("Read failed:"));
    assert!(display.contains("Failed to load entry trees: no such table: entries"));
}

#[test]
fn test_databaseError_intoAnyhow_shouldPreserveMessage() {
    fn fails() -> anyhow::Result<()> {
        let result: Result<(), DatabaseError> = Err(DatabaseError::Uninitialized);
        result?;
        Ok(())
    }

    let error = fails().unwrap_err();
    assert_eq!(error.to_string(), "Database has not been initialized");
    assert!(error.downcast_ref::<DatabaseError>().is_some());
}
