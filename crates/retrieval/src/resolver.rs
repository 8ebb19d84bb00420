use crate::guard;
use auditctx_backend::{field, BoolQuery, LexicalBackend, MatchClause, TermFilter};
use auditctx_model::{ResolverConfig, TimeoutConfig};
use lru::LruCache;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Which documents a query is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentScope {
    /// No keywords were supplied; the full corpus is eligible.
    Unfiltered,
    /// Retrieval is restricted to these documents. `degraded` marks the
    /// union fallback taken when the keyword sets never intersect, a
    /// legitimate but weaker match that must not silently look exact.
    Scoped {
        doc_ids: Vec<String>,
        degraded: bool,
    },
}

impl DocumentScope {
    #[must_use]
    pub fn doc_ids(&self) -> Option<&[String]> {
        match self {
            Self::Unfiltered => None,
            Self::Scoped { doc_ids, .. } => Some(doc_ids),
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Scoped { degraded: true, .. })
    }
}

/// Resolves keywords to scored document sets through the lexical
/// backend and combines them into a single document scope.
///
/// Per-keyword resolutions are memoized in a bounded LRU cache; entries
/// are immutable once inserted, the mutex only covers recency
/// bookkeeping.
pub struct KeywordDocumentResolver {
    lexical: Arc<dyn LexicalBackend>,
    config: ResolverConfig,
    timeouts: TimeoutConfig,
    cache: Mutex<LruCache<String, Arc<Vec<(String, f32)>>>>,
    count_cache: Mutex<LruCache<(String, String), u64>>,
}

impl KeywordDocumentResolver {
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        config: ResolverConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity is at least 1");
        Self {
            lexical,
            config,
            timeouts,
            cache: Mutex::new(LruCache::new(capacity)),
            count_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Ranked (doc_id, score) for one keyword: the keyword boosted across
    /// item/reason/detail, deduplicated per document keeping the max
    /// score, descending. Backend trouble degrades to an empty list.
    pub async fn resolve(&self, keyword: &str) -> Arc<Vec<(String, f32)>> {
        if let Some(cached) = self
            .cache
            .lock()
            .expect("keyword cache poisoned")
            .get(keyword)
            .cloned()
        {
            return cached;
        }

        let query = BoolQuery {
            should: vec![
                MatchClause::new(field::ITEM, keyword, 2.0),
                MatchClause::new(field::REASON, keyword, 1.5),
                MatchClause::new(field::DETAIL, keyword, 1.0),
            ],
            minimum_should_match: 1,
            size: self.config.keyword_top_n,
            ..BoolQuery::default()
        };

        let hits = guard::call(
            "lexical",
            self.timeouts.lexical(),
            self.lexical.search_findings(&query),
        )
        .await
        .unwrap_or_default();

        let mut best: BTreeMap<String, f32> = BTreeMap::new();
        for hit in hits {
            let entry = best.entry(hit.record.doc_id).or_insert(f32::MIN);
            if hit.score > *entry {
                *entry = hit.score;
            }
        }
        let mut docs: Vec<(String, f32)> = best.into_iter().collect();
        docs.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let docs = Arc::new(docs);
        self.cache
            .lock()
            .expect("keyword cache poisoned")
            .put(keyword.to_string(), Arc::clone(&docs));
        docs
    }

    /// Resolve the scoping keywords (at most `scoping_keywords` of them)
    /// and combine their document sets.
    pub async fn scope(&self, keywords: &[String]) -> DocumentScope {
        let scoping: Vec<&String> = keywords
            .iter()
            .take(self.config.scoping_keywords)
            .collect();
        if scoping.is_empty() {
            return DocumentScope::Unfiltered;
        }

        let mut per_keyword = Vec::with_capacity(scoping.len());
        for keyword in &scoping {
            let docs = self.resolve(keyword.as_str()).await;
            log::debug!("keyword '{keyword}' resolved to {} documents", docs.len());
            per_keyword.push(docs);
        }
        self.combine(&per_keyword)
    }

    /// Intersection first; union capped at `union_cap` when the sets
    /// never co-occur (which must not silently return zero results); a
    /// single keyword's set passes through unfiltered.
    pub fn combine(&self, per_keyword: &[Arc<Vec<(String, f32)>>]) -> DocumentScope {
        match per_keyword {
            [] => DocumentScope::Unfiltered,
            [only] => DocumentScope::Scoped {
                doc_ids: only.iter().map(|(doc_id, _)| doc_id.clone()).collect(),
                degraded: false,
            },
            several => {
                let sets: Vec<BTreeSet<&str>> = several
                    .iter()
                    .map(|docs| docs.iter().map(|(doc_id, _)| doc_id.as_str()).collect())
                    .collect();

                let mut intersection = sets[0].clone();
                for set in &sets[1..] {
                    intersection = intersection.intersection(set).copied().collect();
                }
                if !intersection.is_empty() {
                    return DocumentScope::Scoped {
                        doc_ids: intersection.into_iter().map(String::from).collect(),
                        degraded: false,
                    };
                }

                // union fallback, ordered by best score across keywords
                let mut best: BTreeMap<&str, f32> = BTreeMap::new();
                for docs in several {
                    for (doc_id, score) in docs.iter() {
                        let entry = best.entry(doc_id.as_str()).or_insert(f32::MIN);
                        if *score > *entry {
                            *entry = *score;
                        }
                    }
                }
                let mut union: Vec<(&str, f32)> = best.into_iter().collect();
                union.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                union.truncate(self.config.union_cap);

                DocumentScope::Scoped {
                    doc_ids: union.into_iter().map(|(doc_id, _)| doc_id.into()).collect(),
                    degraded: true,
                }
            }
        }
    }

    /// Per-keyword total hit counts across at most the first
    /// `frequency_docs` scoped documents. Counts are memoized per
    /// (document, keyword) pair in a second bounded LRU.
    pub async fn document_frequency(
        &self,
        doc_ids: &[String],
        keywords: &[String],
    ) -> BTreeMap<String, u64> {
        let mut frequency: BTreeMap<String, u64> =
            keywords.iter().map(|kw| (kw.clone(), 0)).collect();

        for doc_id in doc_ids.iter().take(self.config.frequency_docs) {
            for keyword in keywords {
                if let Some(count) = self.count_in_document(doc_id, keyword).await {
                    *frequency.entry(keyword.clone()).or_default() += count;
                }
            }
        }
        frequency
    }

    async fn count_in_document(&self, doc_id: &str, keyword: &str) -> Option<u64> {
        let key = (doc_id.to_string(), keyword.to_string());
        if let Some(count) = self
            .count_cache
            .lock()
            .expect("count cache poisoned")
            .get(&key)
            .copied()
        {
            return Some(count);
        }

        let query = BoolQuery {
            must: vec![MatchClause::new(field::TEXT, keyword, 1.0)],
            filters: vec![TermFilter::new(field::DOC_ID, vec![doc_id.to_string()])],
            ..BoolQuery::default()
        };
        let count = guard::call(
            "lexical",
            self.timeouts.lexical(),
            self.lexical.count_findings(&query),
        )
        .await?;

        self.count_cache
            .lock()
            .expect("count cache poisoned")
            .put(key, count);
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditctx_backend::{FindingRecord, MemoryLexicalBackend};
    use pretty_assertions::assert_eq;

    fn finding(id: &str, doc: &str, item: &str) -> FindingRecord {
        FindingRecord {
            finding_id: id.to_string(),
            doc_id: doc.to_string(),
            item: Some(item.to_string()),
            text: Some(item.to_string()),
            ..FindingRecord::default()
        }
    }

    fn resolver(findings: Vec<FindingRecord>) -> KeywordDocumentResolver {
        KeywordDocumentResolver::new(
            Arc::new(MemoryLexicalBackend::new(findings, Vec::new())),
            ResolverConfig::default(),
            TimeoutConfig::default(),
        )
    }

    #[tokio::test]
    async fn resolve_dedups_by_document_keeping_max() {
        let resolver = resolver(vec![
            finding("f1", "d1", "합병법인 합병법인"),
            finding("f2", "d1", "합병법인"),
            finding("f3", "d2", "합병법인"),
        ]);

        let docs = resolver.resolve("합병법인").await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, "d1");
        assert!(docs[0].1 > docs[1].1);
    }

    #[tokio::test]
    async fn single_keyword_set_passes_through() {
        let resolver = resolver(vec![
            finding("f1", "d1", "합병법인"),
            finding("f2", "d2", "합병법인"),
        ]);

        let scope = resolver.scope(&["합병법인".to_string()]).await;
        match scope {
            DocumentScope::Scoped { doc_ids, degraded } => {
                assert_eq!(doc_ids.len(), 2);
                assert!(!degraded);
            }
            DocumentScope::Unfiltered => panic!("expected a scoped result"),
        }
    }

    #[tokio::test]
    async fn intersection_wins_when_nonempty() {
        let resolver = resolver(vec![
            finding("f1", "d1", "합병법인 미환류소득"),
            finding("f2", "d2", "합병법인"),
            finding("f3", "d3", "미환류소득"),
        ]);

        let scope = resolver
            .scope(&["합병법인".to_string(), "미환류소득".to_string()])
            .await;
        assert_eq!(
            scope,
            DocumentScope::Scoped {
                doc_ids: vec!["d1".to_string()],
                degraded: false,
            }
        );
    }

    #[tokio::test]
    async fn disjoint_sets_fall_back_to_capped_union() {
        let mut findings = Vec::new();
        for i in 0..40 {
            findings.push(finding(&format!("fa{i}"), &format!("da{i:02}"), "합병법인"));
        }
        // repeat the term so the fallback's score ordering keeps this doc
        findings.push(finding("fb", "db", "미환류소득 미환류소득"));
        let resolver = resolver(findings);

        let scope = resolver
            .scope(&["합병법인".to_string(), "미환류소득".to_string()])
            .await;
        match scope {
            DocumentScope::Scoped { doc_ids, degraded } => {
                assert!(degraded);
                assert!(doc_ids.len() <= 30);
                assert!(doc_ids.contains(&"db".to_string()));
            }
            DocumentScope::Unfiltered => panic!("expected a scoped result"),
        }
    }

    #[tokio::test]
    async fn no_keywords_leaves_the_corpus_unfiltered() {
        let resolver = resolver(Vec::new());
        assert_eq!(resolver.scope(&[]).await, DocumentScope::Unfiltered);
    }

    #[tokio::test]
    async fn frequency_counts_only_sampled_documents() {
        let resolver = resolver(vec![
            finding("f1", "d1", "접대비"),
            finding("f2", "d2", "접대비"),
        ]);

        let frequency = resolver
            .document_frequency(
                &["d1".to_string(), "d2".to_string()],
                &["접대비".to_string(), "없는말".to_string()],
            )
            .await;
        assert_eq!(frequency.get("접대비"), Some(&2));
        assert_eq!(frequency.get("없는말"), Some(&0));
    }
}
