use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type FindingId = String;
pub type DocId = String;
pub type ChunkId = String;

/// One finding-level retrieval result.
///
/// Produced once per query by finding-level retrieval and owned by the
/// caller of that stage; the rest of the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub finding_id: FindingId,
    pub doc_id: DocId,
    pub item: Option<String>,
    pub detail: Option<String>,
    pub code: Option<String>,
    pub score_combined: f32,
}

/// A passage (chunk) of one section of one finding.
///
/// Unique by `chunk_id`. Ordering within a finding is
/// `(section_order, passage_order)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageHit {
    pub chunk_id: ChunkId,
    pub finding_id: FindingId,
    pub doc_id: DocId,
    pub section: String,
    pub section_order: u32,
    pub passage_order: u32,
    pub code: Option<String>,
    pub item: Option<String>,
    pub item_norm: Option<String>,
    pub page: Option<u32>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub text: String,
    pub text_norm: Option<String>,
    pub score_lexical: f32,
    pub score_vector: f32,
    pub score_field: f32,
    pub score_combined: f32,
}

impl PassageHit {
    /// Sort key for presentation order inside a finding.
    #[must_use]
    pub fn position(&self) -> (u32, u32) {
        (self.section_order, self.passage_order)
    }
}

/// A ranked aggregation of passages belonging to one finding.
///
/// `passages` is owned exclusively by the block and is sorted by combined
/// score descending. `sections` holds the distinct source section names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBlock {
    pub finding_id: FindingId,
    pub doc_id: DocId,
    pub item: Option<String>,
    pub code: Option<String>,
    pub score: f32,
    pub passages: Vec<PassageHit>,
    pub sections: BTreeSet<String>,
}

/// Provenance for one packed passage; derived 1:1 from packed passages
/// (post merge) and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: DocId,
    pub finding_id: FindingId,
    pub chunk_id: ChunkId,
    pub page: Option<u32>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub text: String,
    pub section: String,
}

/// Outcome of keyword role classification.
///
/// Context keywords scope which documents are eligible; target keywords
/// filter which blocks within those documents qualify. The two lists may
/// overlap only through a fallback merge. `confidence` follows the
/// dictionary coverage ratio; `needs_confirmation` is a hard gate: the
/// caller must defer ranking and ask for disambiguation when it is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRoleResult {
    pub context_keywords: Vec<String>,
    pub target_keywords: Vec<String>,
    pub confidence: f32,
    pub needs_confirmation: bool,
    pub unknown_keywords: Vec<String>,
}

impl KeywordRoleResult {
    /// A result for an empty keyword list: nothing to scope or filter by.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            context_keywords: Vec::new(),
            target_keywords: Vec::new(),
            confidence: 1.0,
            needs_confirmation: false,
            unknown_keywords: Vec::new(),
        }
    }
}

/// The budgeted text package handed to the answer generator.
///
/// `citations` keeps per-chunk provenance in packing order;
/// `cited_findings` is the same sequence deduplicated by finding id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackedContext {
    pub text: String,
    pub citations: Vec<Citation>,
    pub cited_findings: Vec<FindingId>,
}

impl PackedContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}
