/*!
 * Tests for entry payloads and model helpers
 */

use lexistore::database::{Entry, EntryPage, PartOfSpeech, StepReport};
use lexistore::errors::DatabaseError;

use crate::common;

#[test]
fn test_entry_fromGeneratorJson_shouldParseNestedTree() {
    let json = r#"{
        "headword": "běžet",
        "part_of_speech": "verb",
        "source_language": "Czech",
        "target_language": "English",
        "definition_language": "English",
        "has_context": true,
        "context_sentence": "Musím běžet na vlak.",
        "meanings": [
            {
                "definition": "to run",
                "verb_type": "imperfective",
                "examples": [
                    {"sentence": "Musím běžet na vlak.", "translation": "I have to run for the train.",
                     "is_context_sentence": true}
                ]
            }
        ]
    }"#;

    let entry: Entry = serde_json::from_str(json).unwrap();

    assert_eq!(entry.part_of_speech, Some(PartOfSpeech::Single("verb".to_string())));
    assert!(entry.is_contextual());
    assert_eq!(entry.context_key(), "Musím běžet na vlak.");
    assert_eq!(entry.meanings[0].verb_type.as_deref(), Some("imperfective"));
    assert!(entry.meanings[0].examples[0].is_context_sentence);
    assert!(entry.validate().is_ok());
}

#[test]
fn test_entry_serialize_shouldRoundTripThroughJson() {
    let entry = common::run_entry();

    let json = serde_json::to_string(&entry).unwrap();
    let parsed: Entry = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, entry);
}

#[test]
fn test_entry_validate_withMissingLanguage_shouldFail() {
    let entry = Entry::new("run", "English", " ");

    assert!(matches!(entry.validate(), Err(DatabaseError::InvalidEntry(_))));
}

#[test]
fn test_partOfSpeech_display_shouldJoinTags() {
    let pos = PartOfSpeech::Multiple(vec!["verb".to_string(), "noun".to_string()]);

    assert_eq!(pos.to_string(), "verb, noun");
}

#[test]
fn test_stepReport_merge_shouldCollectWarnings() {
    let mut report = StepReport::default();
    report.merge(StepReport {
        applied: vec!["entries.updated_at".to_string()],
        warnings: vec![],
    });
    report.merge(StepReport {
        applied: vec![],
        warnings: vec!["index idx_entries_context: failed".to_string()],
    });

    assert_eq!(report.applied.len(), 1);
    assert!(!report.is_clean());
}

#[test]
fn test_entryPage_empty_shouldHaveZeroTotal() {
    let page = EntryPage::empty(3, 25);

    assert_eq!(page.total, 0);
    assert_eq!(page.page, 3);
    assert!(page.entries.is_empty());
}
