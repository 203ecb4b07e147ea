/*!
 * Dictionary entity models.
 *
 * These structures are both the persisted shape (entries → meanings →
 * examples) and the payload shape produced by the entry-generation
 * workflow, so they (de)serialize with serde.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{DatabaseError, DbResult};

/// Part of speech, either a single tag or an ordered list of tags.
///
/// Stored as the plain tag for a single value and as a JSON array for lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartOfSpeech {
    Single(String),
    Multiple(Vec<String>),
}

impl PartOfSpeech {
    /// Serialize for the `part_of_speech` column
    pub fn to_storage(&self) -> String {
        match self {
            PartOfSpeech::Single(tag) => tag.clone(),
            PartOfSpeech::Multiple(tags) => {
                serde_json::to_string(tags).unwrap_or_else(|_| tags.join(","))
            }
        }
    }

    /// Parse a `part_of_speech` column value
    pub fn from_storage(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            if let Ok(tags) = serde_json::from_str::<Vec<String>>(trimmed) {
                return PartOfSpeech::Multiple(tags);
            }
        }
        PartOfSpeech::Single(trimmed.to_string())
    }

    /// Individual tags, in order
    pub fn tags(&self) -> Vec<&str> {
        match self {
            PartOfSpeech::Single(tag) => vec![tag.as_str()],
            PartOfSpeech::Multiple(tags) => tags.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for PartOfSpeech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tags().join(", "))
    }
}

/// One usage sentence under a meaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Database ID (0 until persisted)
    #[serde(default)]
    pub id: i64,
    pub sentence: String,
    #[serde(default)]
    pub translation: Option<String>,
    /// Marks the literal sentence that triggered entry creation
    #[serde(default)]
    pub is_context_sentence: bool,
    /// Zero-based position within the meaning, assigned at write time
    #[serde(default)]
    pub order_index: i64,
}

impl Example {
    pub fn new(sentence: impl Into<String>) -> Self {
        Self {
            id: 0,
            sentence: sentence.into(),
            translation: None,
            is_context_sentence: false,
            order_index: 0,
        }
    }

    pub fn with_translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }

    pub fn as_context_sentence(mut self) -> Self {
        self.is_context_sentence = true;
        self
    }
}

/// One sense of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meaning {
    /// Database ID (0 until persisted)
    #[serde(default)]
    pub id: i64,
    pub definition: String,
    /// Zero-based position within the entry, assigned at write time
    #[serde(default)]
    pub order_index: i64,
    #[serde(default)]
    pub noun_type: Option<String>,
    #[serde(default)]
    pub verb_type: Option<String>,
    /// Comparison form for adjectives/adverbs
    #[serde(default)]
    pub comparison: Option<String>,
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Meaning {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            id: 0,
            definition: definition.into(),
            order_index: 0,
            noun_type: None,
            verb_type: None,
            comparison: None,
            examples: Vec::new(),
        }
    }

    pub fn with_example(mut self, example: Example) -> Self {
        self.examples.push(example);
        self
    }
}

/// One dictionary headword for a language direction, optionally anchored to a sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Database ID (0 until persisted)
    #[serde(default)]
    pub id: i64,
    pub headword: String,
    #[serde(default)]
    pub part_of_speech: Option<PartOfSpeech>,
    pub source_language: String,
    pub target_language: String,
    /// Language the definitions are written in; defaults to the target language
    #[serde(default)]
    pub definition_language: Option<String>,
    #[serde(default)]
    pub has_context: bool,
    #[serde(default)]
    pub context_sentence: Option<String>,
    #[serde(default)]
    pub meanings: Vec<Meaning>,
    /// Creation timestamp (ISO 8601), set by storage
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp (ISO 8601), set by storage
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Entry {
    pub fn new(
        headword: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            headword: headword.into(),
            part_of_speech: None,
            source_language: source_language.into(),
            target_language: target_language.into(),
            definition_language: None,
            has_context: false,
            context_sentence: None,
            meanings: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_part_of_speech(mut self, part_of_speech: PartOfSpeech) -> Self {
        self.part_of_speech = Some(part_of_speech);
        self
    }

    pub fn with_context(mut self, sentence: impl Into<String>) -> Self {
        self.context_sentence = Some(sentence.into());
        self.has_context = true;
        self
    }

    pub fn with_meaning(mut self, meaning: Meaning) -> Self {
        self.meanings.push(meaning);
        self
    }

    /// Context sentence as used in the uniqueness key (absent → empty)
    pub fn context_key(&self) -> &str {
        self.context_sentence.as_deref().map(str::trim).unwrap_or("")
    }

    /// Whether the entry is anchored to a sentence
    pub fn is_contextual(&self) -> bool {
        self.has_context || !self.context_key().is_empty()
    }

    pub fn effective_definition_language(&self) -> &str {
        self.definition_language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.target_language)
    }

    /// Structural checks performed before any write.
    ///
    /// Linguistic correctness is the generator's concern; only the shape is checked.
    pub fn validate(&self) -> DbResult<()> {
        if self.headword.trim().is_empty() {
            return Err(DatabaseError::InvalidEntry("headword is empty".to_string()));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(DatabaseError::InvalidEntry(format!(
                "entry '{}' is missing a source or target language",
                self.headword
            )));
        }
        if let Some(position) = self
            .meanings
            .iter()
            .position(|m| m.definition.trim().is_empty())
        {
            return Err(DatabaseError::InvalidEntry(format!(
                "meaning {} of '{}' has an empty definition",
                position, self.headword
            )));
        }
        Ok(())
    }
}

/// A word → lemma pair for bulk caching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LemmaMapping {
    pub word: String,
    pub lemma: String,
    pub target_language: String,
}

impl LemmaMapping {
    pub fn new(
        word: impl Into<String>,
        lemma: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            word: word.into(),
            lemma: lemma.into(),
            target_language: target_language.into(),
        }
    }
}

/// One page of entries plus the total number of matches
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

impl EntryPage {
    /// Rows to skip for a 1-based page, saturating instead of overflowing
    pub fn offset(page: usize, page_size: usize) -> usize {
        page.saturating_sub(1).saturating_mul(page_size)
    }

    pub fn empty(page: usize, page_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
            page,
            page_size,
        }
    }
}

/// Outcome of a best-effort schema step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepReport {
    /// Steps that changed the schema
    pub applied: Vec<String>,
    /// Non-fatal failures; the schema stays in its prior valid state
    pub warnings: Vec<String>,
}

impl StepReport {
    pub fn merge(&mut self, other: StepReport) {
        self.applied.extend(other.applied);
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Outcome of a maintenance sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub expired_cache_rows: u64,
    pub statistics_refreshed: bool,
    pub warnings: Vec<String>,
}
