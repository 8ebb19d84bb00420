use crate::filters::SearchFilters;
use crate::fusion::RankFusion;
use crate::guard;
use crate::resolver::DocumentScope;
use auditctx_backend::{
    field, BoolQuery, Embedder, EmbeddingCache, FieldMatch, FindingRecord, LexicalBackend,
    MatchClause, TermFilter, VectorBackend, VectorFilter, VectorQuery,
};
use auditctx_model::{DocumentHit, FindingConfig, TimeoutConfig};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Finding-level hybrid retrieval.
///
/// Turns the resolved document scope into a ranked finding list for the
/// section stage. A single keyword stays on the lexical leg alone (exact
/// text matching is the stronger signal there); from two keywords up the
/// vector leg joins under an elevated similarity threshold and the legs
/// fuse by reciprocal rank.
pub struct FindingRetriever {
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    embeddings: Arc<EmbeddingCache>,
    fusion: RankFusion,
    config: FindingConfig,
    timeouts: TimeoutConfig,
}

impl FindingRetriever {
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        embeddings: Arc<EmbeddingCache>,
        config: FindingConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            embedder,
            embeddings,
            fusion: RankFusion::new(config.rrf_k),
            config,
            timeouts,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        keywords: &[String],
        scope: &DocumentScope,
        filters: &SearchFilters,
    ) -> Vec<DocumentHit> {
        let lexical_query = self.lexical_query(query, keywords, scope, filters);
        let use_vector = keywords.len() >= 2;

        let (lexical_hits, vector_hits) = tokio::join!(
            async {
                guard::call(
                    "lexical",
                    self.timeouts.lexical(),
                    self.lexical.search_findings(&lexical_query),
                )
                .await
                .unwrap_or_default()
            },
            async {
                if !use_vector {
                    return Vec::new();
                }
                let Some(vector) = guard::call(
                    "embedding",
                    self.timeouts.embed(),
                    self.embeddings.embed(self.embedder.as_ref(), query),
                )
                .await
                else {
                    return Vec::new();
                };
                let vector_query = self.vector_query((*vector).clone(), scope, filters);
                guard::call(
                    "vector",
                    self.timeouts.vector(),
                    self.vector.search_findings(&vector_query),
                )
                .await
                .unwrap_or_default()
            },
        );

        let mut records: BTreeMap<String, FindingRecord> = BTreeMap::new();
        // vector payloads first so the fuller lexical records win
        for hit in &vector_hits {
            records.insert(hit.record.finding_id.clone(), hit.record.clone());
        }
        for hit in &lexical_hits {
            records.insert(hit.record.finding_id.clone(), hit.record.clone());
        }

        let mut hits: Vec<DocumentHit> = if use_vector {
            let lexical_ranked: Vec<(String, f32)> = lexical_hits
                .iter()
                .map(|h| (h.record.finding_id.clone(), h.score))
                .collect();
            let vector_ranked: Vec<(String, f32)> = vector_hits
                .iter()
                .map(|h| (h.record.finding_id.clone(), h.score))
                .collect();
            log::debug!(
                "finding retrieval fused {} lexical + {} vector hits",
                lexical_ranked.len(),
                vector_ranked.len()
            );

            self.fusion
                .fuse(&lexical_ranked, &vector_ranked, self.config.top_n)
                .into_iter()
                .filter_map(|(finding_id, score)| {
                    records
                        .get(&finding_id)
                        .map(|record| document_hit(record, score as f32))
                })
                .collect()
        } else {
            lexical_hits
                .iter()
                .take(self.config.top_n)
                .map(|hit| document_hit(&hit.record, hit.score))
                .collect()
        };

        // with an active document filter, cut the long tail relative to
        // the best hit
        if scope.doc_ids().is_some() {
            if let Some(top) = hits.first() {
                let floor = top.score_combined * self.config.relative_cutoff;
                hits.retain(|hit| hit.score_combined >= floor);
                hits.truncate(self.config.top_n);
            }
        }
        hits
    }

    fn lexical_query(
        &self,
        query: &str,
        keywords: &[String],
        scope: &DocumentScope,
        filters: &SearchFilters,
    ) -> BoolQuery {
        let mut lexical_query = BoolQuery::sized(self.config.candidates_per_leg);

        if keywords.is_empty() {
            lexical_query.should = vec![
                MatchClause::new(field::ITEM, query, 2.0),
                MatchClause::new(field::REASON, query, 1.0),
                MatchClause::new(field::DETAIL, query, 1.0),
            ];
            lexical_query.minimum_should_match = 1;
        } else {
            let boost = self.config.keyword_boost;
            for keyword in keywords {
                lexical_query.should.push(MatchClause::new(field::ITEM, keyword, boost));
                lexical_query
                    .should
                    .push(MatchClause::new(field::REASON, keyword, boost * 0.8));
                lexical_query
                    .should
                    .push(MatchClause::new(field::DETAIL, keyword, boost * 0.5));
            }
            // with a document filter the should clauses only rank;
            // without one they are the match condition
            lexical_query.minimum_should_match = usize::from(scope.doc_ids().is_none());
        }

        if let Some(doc_ids) = scope.doc_ids() {
            lexical_query
                .filters
                .push(TermFilter::new(field::DOC_ID, doc_ids.to_vec()));
        }
        if !filters.codes.is_empty() {
            lexical_query
                .filters
                .push(TermFilter::new(field::CODE, filters.codes.clone()));
        }
        lexical_query
    }

    fn vector_query(
        &self,
        vector: Vec<f32>,
        scope: &DocumentScope,
        filters: &SearchFilters,
    ) -> VectorQuery {
        let mut filter = VectorFilter::default();
        if let Some(doc_ids) = scope.doc_ids() {
            filter
                .any_of
                .extend(doc_ids.iter().map(|id| FieldMatch::new(field::DOC_ID, id)));
        }
        for code in &filters.codes {
            filter.any_of.push(FieldMatch::new(field::CODE, code));
        }
        VectorQuery {
            vector,
            filter,
            limit: self.config.candidates_per_leg,
            score_threshold: self.config.vector_threshold,
        }
    }
}

fn document_hit(record: &FindingRecord, score: f32) -> DocumentHit {
    DocumentHit {
        finding_id: record.finding_id.clone(),
        doc_id: record.doc_id.clone(),
        item: record.item.clone(),
        detail: record.detail.clone(),
        code: record.code.clone(),
        score_combined: score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditctx_backend::{
        BackendError, HashingEmbedder, MemoryLexicalBackend, MemoryVectorBackend, ScoredFinding,
    };
    use pretty_assertions::assert_eq;

    fn finding(id: &str, doc: &str, item: &str, detail: &str) -> FindingRecord {
        FindingRecord {
            finding_id: id.to_string(),
            doc_id: doc.to_string(),
            item: Some(item.to_string()),
            detail: Some(detail.to_string()),
            ..FindingRecord::default()
        }
    }

    async fn vector_backend(
        embedder: &HashingEmbedder,
        rows: &[(FindingRecord, &str)],
    ) -> MemoryVectorBackend {
        let mut backend = MemoryVectorBackend::new(embedder.dimension());
        for (record, text) in rows {
            let vector = embedder.embed(text).await.unwrap();
            backend.add_finding(record.clone(), vector).unwrap();
        }
        backend
    }

    fn retriever(
        lexical: MemoryLexicalBackend,
        vector: MemoryVectorBackend,
        embedder: HashingEmbedder,
        config: FindingConfig,
    ) -> FindingRetriever {
        FindingRetriever::new(
            Arc::new(lexical),
            Arc::new(vector),
            Arc::new(embedder),
            Arc::new(EmbeddingCache::new(100)),
            config,
            TimeoutConfig::default(),
        )
    }

    #[tokio::test]
    async fn single_keyword_stays_lexical_only() {
        let embedder = HashingEmbedder::new(32);
        let lexical = MemoryLexicalBackend::new(
            vec![finding("f1", "d1", "합병법인 사례", "")],
            Vec::new(),
        );
        // the vector side knows a different finding; it must not surface
        let vector = vector_backend(
            &embedder,
            &[(finding("f9", "d9", "다른 건", ""), "합병법인 사례")],
        )
        .await;

        let hits = retriever(lexical, vector, embedder, FindingConfig::default())
            .retrieve(
                "합병법인 사례",
                &["합병법인".to_string()],
                &DocumentScope::Unfiltered,
                &SearchFilters::default(),
            )
            .await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].finding_id, "f1");
    }

    #[tokio::test]
    async fn two_keywords_fuse_both_legs() {
        let embedder = HashingEmbedder::new(32);
        let lexical = MemoryLexicalBackend::new(
            vec![finding("f1", "d1", "합병법인 미환류소득", "")],
            Vec::new(),
        );
        let vector = vector_backend(
            &embedder,
            &[(
                finding("f2", "d2", "미환류소득 상세", ""),
                "합병법인 미환류소득 사례",
            )],
        )
        .await;

        let mut config = FindingConfig::default();
        config.vector_threshold = 0.3;
        let hits = retriever(lexical, vector, embedder, config)
            .retrieve(
                "합병법인 미환류소득 사례",
                &["합병법인".to_string(), "미환류소득".to_string()],
                &DocumentScope::Unfiltered,
                &SearchFilters::default(),
            )
            .await;

        let ids: Vec<&str> = hits.iter().map(|h| h.finding_id.as_str()).collect();
        assert!(ids.contains(&"f1"));
        assert!(ids.contains(&"f2"));
    }

    #[tokio::test]
    async fn document_scope_restricts_the_lexical_leg() {
        let embedder = HashingEmbedder::new(32);
        let lexical = MemoryLexicalBackend::new(
            vec![
                finding("f1", "d1", "접대비", ""),
                finding("f2", "d2", "접대비", ""),
            ],
            Vec::new(),
        );
        let vector = MemoryVectorBackend::new(32);

        let hits = retriever(lexical, vector, embedder, FindingConfig::default())
            .retrieve(
                "접대비",
                &["접대비".to_string()],
                &DocumentScope::Scoped {
                    doc_ids: vec!["d2".to_string()],
                    degraded: false,
                },
                &SearchFilters::default(),
            )
            .await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "d2");
    }

    #[tokio::test]
    async fn relative_cutoff_trims_the_tail_under_a_scope() {
        let embedder = HashingEmbedder::new(32);
        let lexical = MemoryLexicalBackend::new(
            vec![
                finding("f1", "d1", "접대비 접대비 접대비 접대비", ""),
                finding("f2", "d1", "접대비", ""),
            ],
            Vec::new(),
        );
        let vector = MemoryVectorBackend::new(32);

        let hits = retriever(lexical, vector, embedder, FindingConfig::default())
            .retrieve(
                "접대비",
                &["접대비".to_string()],
                &DocumentScope::Scoped {
                    doc_ids: vec!["d1".to_string()],
                    degraded: false,
                },
                &SearchFilters::default(),
            )
            .await;

        // f2 scores a quarter of f1 and falls under the 50% floor
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].finding_id, "f1");
    }

    #[tokio::test]
    async fn lexical_failure_degrades_to_empty() {
        struct FailingLexical;

        #[async_trait::async_trait]
        impl LexicalBackend for FailingLexical {
            async fn search_findings(
                &self,
                _query: &BoolQuery,
            ) -> auditctx_backend::Result<Vec<ScoredFinding>> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }

            async fn search_passages(
                &self,
                _query: &BoolQuery,
            ) -> auditctx_backend::Result<Vec<auditctx_backend::ScoredPassage>> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }

            async fn count_findings(&self, _query: &BoolQuery) -> auditctx_backend::Result<u64> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }

            async fn get_passage(
                &self,
                _chunk_id: &str,
            ) -> auditctx_backend::Result<Option<auditctx_backend::PassageRecord>> {
                Err(BackendError::Unavailable("connection refused".to_string()))
            }
        }

        let embedder = HashingEmbedder::new(32);
        let retriever = FindingRetriever::new(
            Arc::new(FailingLexical),
            Arc::new(MemoryVectorBackend::new(32)),
            Arc::new(embedder),
            Arc::new(EmbeddingCache::new(100)),
            FindingConfig::default(),
            TimeoutConfig::default(),
        );

        let hits = retriever
            .retrieve(
                "접대비",
                &["접대비".to_string()],
                &DocumentScope::Unfiltered,
                &SearchFilters::default(),
            )
            .await;
        assert!(hits.is_empty());
    }
}
