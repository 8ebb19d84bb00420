use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Field names shared between the query model and backend adapters.
///
/// Adapters translate these to whatever their engine's schema calls them.
pub mod field {
    pub const ITEM: &str = "item";
    pub const REASON: &str = "reason";
    pub const DETAIL: &str = "detail";
    pub const TEXT: &str = "text";
    pub const TEXT_NORM: &str = "text_norm";
    pub const SECTION: &str = "section";
    pub const FINDING_ID: &str = "finding_id";
    pub const DOC_ID: &str = "doc_id";
    pub const CODE: &str = "code";
}

/// A fielded text match with a ranking boost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchClause {
    pub field: String,
    pub query: String,
    pub boost: f32,
}

impl MatchClause {
    pub fn new(field: impl Into<String>, query: impl Into<String>, boost: f32) -> Self {
        Self {
            field: field.into(),
            query: query.into(),
            boost,
        }
    }
}

/// An exact term filter: the record's field must equal one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFilter {
    pub field: String,
    pub values: Vec<String>,
}

impl TermFilter {
    pub fn new(field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }
}

/// Boolean query over fielded text.
///
/// `must` clauses all have to match; `should` clauses only contribute to
/// the score unless `minimum_should_match` requires some of them.
/// `filters` are exact-term restrictions that never affect scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<MatchClause>,
    pub should: Vec<MatchClause>,
    pub filters: Vec<TermFilter>,
    pub minimum_should_match: usize,
    pub size: usize,
}

impl BoolQuery {
    #[must_use]
    pub fn sized(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn must(mut self, clause: MatchClause) -> Self {
        self.must.push(clause);
        self
    }

    #[must_use]
    pub fn should(mut self, clause: MatchClause) -> Self {
        self.should.push(clause);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: TermFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// One finding-level record as stored by the ingestion collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub finding_id: String,
    pub doc_id: String,
    pub item: Option<String>,
    pub reason: Option<String>,
    pub detail: Option<String>,
    pub code: Option<String>,
    pub text: Option<String>,
}

/// One passage record. `text` is optional because vector payloads may
/// omit large text fields for size; retrieval backfills it from the
/// lexical store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    pub chunk_id: String,
    pub finding_id: String,
    pub doc_id: String,
    pub section: String,
    pub section_order: u32,
    pub passage_order: u32,
    pub code: Option<String>,
    pub item: Option<String>,
    pub item_norm: Option<String>,
    pub page: Option<u32>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub text: Option<String>,
    pub text_norm: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFinding {
    pub record: FindingRecord,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub record: PassageRecord,
    pub score: f32,
}

/// Ranked boolean retrieval over finding and passage records.
///
/// Implementations wrap a concrete engine (any fielded text index with
/// boosting works). Scores are engine-native; higher is better. Result
/// order must be deterministic: score descending, ties by id ascending.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    async fn search_findings(&self, query: &BoolQuery) -> Result<Vec<ScoredFinding>>;

    async fn search_passages(&self, query: &BoolQuery) -> Result<Vec<ScoredPassage>>;

    /// Number of finding records matching `query`, ignoring `size`.
    async fn count_findings(&self, query: &BoolQuery) -> Result<u64>;

    /// Point lookup used to backfill passage text dropped from vector
    /// payloads.
    async fn get_passage(&self, chunk_id: &str) -> Result<Option<PassageRecord>>;
}
