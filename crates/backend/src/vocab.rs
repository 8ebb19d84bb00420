use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// The role a dictionary keyword plays in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordRole {
    /// Scopes which documents are eligible (industry, entity type,
    /// special situation).
    Context,
    /// Names what is actually being looked for (account item,
    /// adjustment type, transaction kind).
    Target,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VocabEntry {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVocabulary {
    #[serde(default)]
    context: HashMap<String, VocabEntry>,
    #[serde(default)]
    target: HashMap<String, VocabEntry>,
}

/// The keyword role dictionary, loaded once at startup and read-only for
/// the life of the process. Lookup is case-insensitive over keywords and
/// their listed synonyms; a keyword present in both dictionaries resolves
/// to context, matching the lookup precedence of the role split.
#[derive(Debug, Default)]
pub struct Vocabulary {
    context: HashMap<String, VocabEntry>,
    target: HashMap<String, VocabEntry>,
    // lowercased keyword/synonym → role
    index: HashMap<String, KeywordRole>,
}

impl Vocabulary {
    #[must_use]
    pub fn new(
        context: HashMap<String, VocabEntry>,
        target: HashMap<String, VocabEntry>,
    ) -> Self {
        let mut index = HashMap::new();
        // target first so that context entries win collisions
        index_entries(&mut index, &target, KeywordRole::Target);
        index_entries(&mut index, &context, KeywordRole::Context);
        Self {
            context,
            target,
            index,
        }
    }

    /// Load from a JSON document of the shape
    /// `{"context": {kw: {category, synonyms}}, "target": {...}}`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: RawVocabulary =
            serde_json::from_slice(bytes).context("failed to parse vocabulary JSON")?;
        Ok(Self::new(raw.context, raw.target))
    }

    /// Resolve a keyword to its dictionary role, if it has one.
    #[must_use]
    pub fn lookup(&self, keyword: &str) -> Option<KeywordRole> {
        self.index.get(&keyword.to_lowercase()).copied()
    }

    #[must_use]
    pub fn context_entries(&self) -> &HashMap<String, VocabEntry> {
        &self.context
    }

    #[must_use]
    pub fn target_entries(&self) -> &HashMap<String, VocabEntry> {
        &self.target
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.context.len() + self.target.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.target.is_empty()
    }
}

fn index_entries(
    index: &mut HashMap<String, KeywordRole>,
    entries: &HashMap<String, VocabEntry>,
    role: KeywordRole,
) {
    for (keyword, entry) in entries {
        index.insert(keyword.to_lowercase(), role);
        for synonym in &entry.synonyms {
            index.insert(synonym.to_lowercase(), role);
        }
    }
}
