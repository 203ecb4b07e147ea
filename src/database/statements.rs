/*!
 * The fixed set of statements shared by every repository.
 *
 * They are compiled once during initialization so the hot paths (lookup,
 * insert, ranked search, cache get/set) reuse their query plans. Every
 * statement is written to run unchanged on both dialects.
 */

/// Columns selected by every entry-tree join, in `EntryRow` order
pub const ENTRY_TREE_COLUMNS: &str = r#"
    e.id, e.headword, e.part_of_speech, e.source_language, e.target_language,
    e.definition_language, e.has_context, e.context_sentence, e.created_at, e.updated_at,
    m.id, m.definition, m.order_index, m.noun_type, m.verb_type, m.comparison,
    x.id, x.sentence, x.translation, x.is_context_sentence, x.order_index
"#;

/// Join and ordering used to rebuild entry trees
pub const ENTRY_TREE_FROM: &str = r#"
    FROM entries e
    LEFT JOIN meanings m ON m.entry_id = e.id
    LEFT JOIN examples x ON x.meaning_id = m.id
"#;

pub const ENTRY_TREE_ORDER: &str = "ORDER BY e.id, m.order_index, m.id, x.order_index, x.id";

/// Named SQL for the shared statement set
#[derive(Debug, Clone, Copy)]
pub struct Statements {
    /// ?1 headword, ?2 source, ?3 target → newest matching id
    pub lookup_by_headword: &'static str,
    /// ?1 headword, ?2 source, ?3 target, ?4 context-or-empty → id
    pub find_by_key: &'static str,
    /// ?1 entry id → full tree rows
    pub entry_tree: &'static str,
    pub insert_entry: &'static str,
    pub insert_meaning: &'static str,
    pub insert_example: &'static str,
    /// ?1 source|NULL, ?2 target|NULL, ?3 prefix pattern, ?4 match pattern,
    /// ?5 lowercased term, ?6 limit, ?7 offset
    pub ranked_search: &'static str,
    /// Same filters as `ranked_search`, ?1..?4
    pub ranked_search_count: &'static str,
    /// ?1 word, ?2 target language, ?3 now → lemma
    pub cache_get: &'static str,
    pub cache_hit: &'static str,
    /// ?1 word, ?2 lemma, ?3 target language, ?4 created_at, ?5 expires_at
    pub cache_set: &'static str,
}

pub const STATEMENTS: Statements = Statements {
    lookup_by_headword: r#"
        SELECT id FROM entries
        WHERE LOWER(headword) = LOWER(?1)
          AND source_language = ?2
          AND target_language = ?3
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    "#,
    find_by_key: r#"
        SELECT id FROM entries
        WHERE LOWER(headword) = LOWER(?1)
          AND source_language = ?2
          AND target_language = ?3
          AND COALESCE(context_sentence, '') = ?4
        LIMIT 1
    "#,
    entry_tree: r#"
        SELECT
            e.id, e.headword, e.part_of_speech, e.source_language, e.target_language,
            e.definition_language, e.has_context, e.context_sentence, e.created_at, e.updated_at,
            m.id, m.definition, m.order_index, m.noun_type, m.verb_type, m.comparison,
            x.id, x.sentence, x.translation, x.is_context_sentence, x.order_index
        FROM entries e
        LEFT JOIN meanings m ON m.entry_id = e.id
        LEFT JOIN examples x ON x.meaning_id = m.id
        WHERE e.id = ?1
        ORDER BY e.id, m.order_index, m.id, x.order_index, x.id
    "#,
    insert_entry: r#"
        INSERT INTO entries (
            headword, part_of_speech, source_language, target_language, definition_language,
            has_context, context_sentence, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        RETURNING id
    "#,
    insert_meaning: r#"
        INSERT INTO meanings (entry_id, definition, order_index, noun_type, verb_type, comparison)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING id
    "#,
    insert_example: r#"
        INSERT INTO examples (meaning_id, sentence, translation, is_context_sentence, order_index)
        VALUES (?1, ?2, ?3, ?4, ?5)
    "#,
    ranked_search: r#"
        SELECT id FROM entries
        WHERE source_language = COALESCE(?1, source_language)
          AND target_language = COALESCE(?2, target_language)
          AND (LOWER(headword) LIKE ?3 ESCAPE '\' OR LOWER(headword) LIKE ?4 ESCAPE '\')
        ORDER BY
            CASE
                WHEN LOWER(headword) = ?5 THEN 0
                WHEN LOWER(headword) LIKE ?3 ESCAPE '\' THEN 1
                ELSE 2
            END,
            LOWER(headword),
            id
        LIMIT ?6 OFFSET ?7
    "#,
    ranked_search_count: r#"
        SELECT COUNT(*) FROM entries
        WHERE source_language = COALESCE(?1, source_language)
          AND target_language = COALESCE(?2, target_language)
          AND (LOWER(headword) LIKE ?3 ESCAPE '\' OR LOWER(headword) LIKE ?4 ESCAPE '\')
    "#,
    cache_get: r#"
        SELECT lemma FROM lemma_cache
        WHERE word = ?1 AND target_language = ?2 AND expires_at > ?3
    "#,
    cache_hit: r#"
        UPDATE lemma_cache SET hit_count = hit_count + 1
        WHERE word = ?1 AND target_language = ?2
    "#,
    cache_set: r#"
        INSERT INTO lemma_cache (word, lemma, target_language, created_at, expires_at, hit_count)
        VALUES (?1, ?2, ?3, ?4, ?5, 0)
        ON CONFLICT (word, target_language) DO UPDATE SET
            lemma = excluded.lemma,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at
    "#,
};

impl Statements {
    /// Every statement with its name, for warming at startup
    pub fn all(&self) -> [(&'static str, &'static str); 11] {
        [
            ("lookup_by_headword", self.lookup_by_headword),
            ("find_by_key", self.find_by_key),
            ("entry_tree", self.entry_tree),
            ("insert_entry", self.insert_entry),
            ("insert_meaning", self.insert_meaning),
            ("insert_example", self.insert_example),
            ("ranked_search", self.ranked_search),
            ("ranked_search_count", self.ranked_search_count),
            ("cache_get", self.cache_get),
            ("cache_hit", self.cache_hit),
            ("cache_set", self.cache_set),
        ]
    }
}
