use serde::{Deserialize, Serialize};

/// Optional exact-term restrictions a request can carry into retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub codes: Vec<String>,
    pub doc_ids: Vec<String>,
}

impl SearchFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.doc_ids.is_empty()
    }
}
