mod embed;
mod error;
mod lexical;
mod memory;
mod vector;
mod vocab;

pub use embed::{Embedder, EmbeddingCache};
pub use error::{BackendError, Result};
pub use lexical::{
    field, BoolQuery, FindingRecord, LexicalBackend, MatchClause, PassageRecord, ScoredFinding,
    ScoredPassage, TermFilter,
};
pub use memory::{HashingEmbedder, MemoryLexicalBackend, MemoryVectorBackend};
pub use vector::{FieldMatch, VectorBackend, VectorFilter, VectorQuery};
pub use vocab::{KeywordRole, VocabEntry, Vocabulary};
