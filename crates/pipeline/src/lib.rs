mod engine;
mod request;

pub use engine::ContextEngine;
pub use request::{Clarification, ContextBundle, ContextRequest, ContextResponse};

// the shapes an orchestrator needs alongside the engine
pub use auditctx_backend::{
    Embedder, LexicalBackend, VectorBackend, Vocabulary,
};
pub use auditctx_model::{
    Citation, DocumentHit, EngineConfig, KeywordRoleResult, PackedContext, RankedBlock,
};
pub use auditctx_retrieval::{RoleClassifier, SearchFilters};
