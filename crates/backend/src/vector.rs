use crate::error::Result;
use crate::lexical::{ScoredFinding, ScoredPassage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An exact metadata predicate on a payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: String,
    pub value: String,
}

impl FieldMatch {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Metadata filter for nearest-neighbor search.
///
/// All `must` predicates have to hold; when `any_of` is non-empty at
/// least one of its predicates has to hold as well ("must section AND
/// (any of finding ids)").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub must: Vec<FieldMatch>,
    pub any_of: Vec<FieldMatch>,
}

impl VectorFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.any_of.is_empty()
    }
}

/// One nearest-neighbor search request.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub filter: VectorFilter,
    pub limit: usize,
    /// Hits scoring below this similarity are not returned.
    pub score_threshold: f32,
}

/// Nearest-neighbor search over a fixed-dimension embedding space.
///
/// Payload records ride along with each hit; passage payloads may omit
/// text (see [`crate::PassageRecord`]). Result order must be score
/// descending, ties by id ascending.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn dimension(&self) -> usize;

    async fn search_findings(&self, query: &VectorQuery) -> Result<Vec<ScoredFinding>>;

    async fn search_passages(&self, query: &VectorQuery) -> Result<Vec<ScoredPassage>>;
}
