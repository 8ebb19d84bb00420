use auditctx_model::{DocumentHit, KeywordRoleResult, PackedContext, RankedBlock};
use auditctx_retrieval::SearchFilters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One retrieval request from the orchestrator.
///
/// `keywords` come from upstream query parsing; the hint lists carry
/// per-role terms that sharpen the two section queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextRequest {
    pub query: String,
    pub keywords: Vec<String>,
    pub filters: SearchFilters,
    pub rationale_hints: Vec<String>,
    pub method_hints: Vec<String>,
}

impl ContextRequest {
    #[must_use]
    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// What the engine hands back to the orchestrator.
///
/// Only two states require action from the caller: a confirmation
/// request and "no matches". Degraded backends never surface here; they
/// only lower ranking quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContextResponse {
    /// Keyword roles were too uncertain to rank on; ask the user first.
    NeedsConfirmation(Clarification),
    /// The pipeline ran but produced zero blocks.
    NoMatches {
        roles: KeywordRoleResult,
        degraded_scope: bool,
        excluded_blocks: Vec<RankedBlock>,
    },
    Ready(Box<ContextBundle>),
}

/// Structured disambiguation request; no prose is generated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    pub confidence: f32,
    pub context_keywords: Vec<String>,
    pub target_keywords: Vec<String>,
    pub unknown_keywords: Vec<String>,
}

/// The full result bundle for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub context: PackedContext,
    pub blocks: Vec<RankedBlock>,
    /// Scored candidates that did not make the final cut, for
    /// "there were N more matches" disclosure.
    pub excluded_blocks: Vec<RankedBlock>,
    pub findings: Vec<DocumentHit>,
    pub roles: KeywordRoleResult,
    /// Per-keyword hit counts over the scoped documents (intersection
    /// scope only).
    pub keyword_frequency: BTreeMap<String, u64>,
    /// Candidate blocks that matched each target keyword.
    pub keyword_block_matches: BTreeMap<String, u64>,
    /// The document scope came from the union fallback.
    pub degraded_scope: bool,
}
