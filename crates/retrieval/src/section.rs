use crate::filters::SearchFilters;
use crate::fusion::RankFusion;
use crate::guard;
use auditctx_backend::{
    field, BoolQuery, Embedder, EmbeddingCache, FieldMatch, LexicalBackend, MatchClause,
    PassageRecord, TermFilter, VectorBackend, VectorFilter, VectorQuery,
};
use auditctx_model::{PassageHit, SectionConfig, TimeoutConfig};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hybrid retrieval of passages scoped to one section and a finding-id
/// allowlist.
///
/// Both legs run concurrently under their own timeouts and fuse by
/// reciprocal rank. A leg that fails degrades to empty; an all-empty
/// fusion is a valid "no results" outcome, never an error.
pub struct SectionChunkRetriever {
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    embeddings: Arc<EmbeddingCache>,
    fusion: RankFusion,
    config: SectionConfig,
    timeouts: TimeoutConfig,
}

impl SectionChunkRetriever {
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        embeddings: Arc<EmbeddingCache>,
        config: SectionConfig,
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

    pub async fn retrieve_section(
        &self,
        query: &str,
        section: &str,
        finding_ids: &[String],
        filters: &SearchFilters,
        top_n: usize,
    ) -> Vec<PassageHit> {
        let lexical_query = self.lexical_query(query, section, finding_ids, filters);

        let (lexical_hits, vector_hits) = tokio::join!(
            async {
                guard::call(
                    "lexical",
                    self.timeouts.lexical(),
                    self.lexical.search_passages(&lexical_query),
                )
                .await
                .unwrap_or_default()
            },
            async {
                let Some(vector) = guard::call(
                    "embedding",
                    self.timeouts.embed(),
                    self.embeddings.embed(self.embedder.as_ref(), query),
                )
                .await
                else {
                    return Vec::new();
                };
                let vector_query = self.vector_query((*vector).clone(), section, finding_ids);
                guard::call(
                    "vector",
                    self.timeouts.vector(),
                    self.vector.search_passages(&vector_query),
                )
                .await
                .unwrap_or_default()
            },
        );
        log::debug!(
            "section '{section}': {} lexical + {} vector candidates",
            lexical_hits.len(),
            vector_hits.len()
        );

        let mut lexical_scores: BTreeMap<String, f32> = BTreeMap::new();
        let mut vector_scores: BTreeMap<String, f32> = BTreeMap::new();
        let mut records: BTreeMap<String, PassageRecord> = BTreeMap::new();

        let vector_ranked: Vec<(String, f32)> = vector_hits
            .iter()
            .map(|h| (h.record.chunk_id.clone(), h.score))
            .collect();
        for hit in vector_hits {
            vector_scores.insert(hit.record.chunk_id.clone(), hit.score);
            records.insert(hit.record.chunk_id.clone(), hit.record);
        }
        let lexical_ranked: Vec<(String, f32)> = lexical_hits
            .iter()
            .map(|h| (h.record.chunk_id.clone(), h.score))
            .collect();
        // lexical records carry full text; let them win the payload merge
        for hit in lexical_hits {
            lexical_scores.insert(hit.record.chunk_id.clone(), hit.score);
            records.insert(hit.record.chunk_id.clone(), hit.record);
        }

        let fused = self.fusion.fuse(&lexical_ranked, &vector_ranked, top_n);

        let mut passages = Vec::with_capacity(fused.len());
        for (chunk_id, fused_score) in fused {
            let Some(record) = records.remove(&chunk_id) else {
                continue;
            };
            let Some(record) = self.backfill_text(record).await else {
                continue;
            };
            let text = record.text.clone().unwrap_or_default();
            passages.push(PassageHit {
                chunk_id: chunk_id.clone(),
                finding_id: record.finding_id,
                doc_id: record.doc_id,
                section: record.section,
                section_order: record.section_order,
                passage_order: record.passage_order,
                code: record.code,
                item: record.item,
                item_norm: record.item_norm,
                page: record.page,
                start_line: record.start_line,
                end_line: record.end_line,
                text,
                text_norm: record.text_norm,
                score_lexical: lexical_scores.get(&chunk_id).copied().unwrap_or(0.0),
                score_vector: vector_scores.get(&chunk_id).copied().unwrap_or(0.0),
                score_field: 0.0,
                score_combined: fused_score as f32,
            });
        }
        passages
    }

    /// Vector payloads may omit large text fields; recover the text by
    /// point lookup, or drop the passage when even that fails.
    async fn backfill_text(&self, record: PassageRecord) -> Option<PassageRecord> {
        let has_text = record.text.as_deref().is_some_and(|t| !t.is_empty());
        if has_text {
            return Some(record);
        }

        let looked_up = guard::call(
            "lexical",
            self.timeouts.lexical(),
            self.lexical.get_passage(&record.chunk_id),
        )
        .await
        .flatten();

        match looked_up {
            Some(full) if full.text.as_deref().is_some_and(|t| !t.is_empty()) => {
                Some(PassageRecord {
                    text: full.text,
                    text_norm: full.text_norm.or(record.text_norm),
                    ..record
                })
            }
            _ => {
                log::warn!(
                    "dropping passage {}: no text available after lookup",
                    record.chunk_id
                );
                None
            }
        }
    }

    fn lexical_query(
        &self,
        query: &str,
        section: &str,
        finding_ids: &[String],
        filters: &SearchFilters,
    ) -> BoolQuery {
        let mut lexical_query = BoolQuery {
            should: vec![
                MatchClause::new(field::TEXT, query, 2.0),
                MatchClause::new(field::TEXT_NORM, query, 1.0),
                MatchClause::new(field::ITEM, query, 1.0),
            ],
            minimum_should_match: 1,
            size: self.config.candidates_per_leg,
            ..BoolQuery::default()
        };
        lexical_query
            .filters
            .push(TermFilter::new(field::SECTION, vec![section.to_string()]));
        lexical_query
            .filters
            .push(TermFilter::new(field::FINDING_ID, finding_ids.to_vec()));
        if !filters.codes.is_empty() {
            lexical_query
                .filters
                .push(TermFilter::new(field::CODE, filters.codes.clone()));
        }
        if !filters.doc_ids.is_empty() {
            lexical_query
                .filters
                .push(TermFilter::new(field::DOC_ID, filters.doc_ids.clone()));
        }
        lexical_query
    }

    fn vector_query(
        &self,
        vector: Vec<f32>,
        section: &str,
        finding_ids: &[String],
    ) -> VectorQuery {
        // the allowlist already descends from the scoped, code-filtered
        // finding set, so the vector leg only needs section + findings
        VectorQuery {
            vector,
            filter: VectorFilter {
                must: vec![FieldMatch::new(field::SECTION, section)],
                any_of: finding_ids
                    .iter()
                    .map(|id| FieldMatch::new(field::FINDING_ID, id))
                    .collect(),
            },
            limit: self.config.candidates_per_leg,
            score_threshold: self.config.vector_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditctx_backend::{HashingEmbedder, MemoryLexicalBackend, MemoryVectorBackend};
    use pretty_assertions::assert_eq;

    fn passage(chunk: &str, finding: &str, section: &str, order: u32, text: &str) -> PassageRecord {
        PassageRecord {
            chunk_id: chunk.to_string(),
            finding_id: finding.to_string(),
            doc_id: "d1".to_string(),
            section: section.to_string(),
            section_order: 1,
            passage_order: order,
            page: Some(3),
            start_line: Some(10 * order),
            end_line: Some(10 * order + 9),
            text: Some(text.to_string()),
            ..PassageRecord::default()
        }
    }

    async fn retriever_with(
        passages: Vec<PassageRecord>,
        vector_rows: Vec<(PassageRecord, String)>,
        omit_text: bool,
    ) -> SectionChunkRetriever {
        let embedder = HashingEmbedder::new(32);
        let mut vector = MemoryVectorBackend::new(32);
        if omit_text {
            vector = vector.omitting_passage_text();
        }
        for (record, text) in vector_rows {
            let embedded = embedder.embed(&text).await.unwrap();
            vector.add_passage(record, embedded).unwrap();
        }
        SectionChunkRetriever::new(
            Arc::new(MemoryLexicalBackend::new(Vec::new(), passages)),
            Arc::new(vector),
            Arc::new(embedder),
            Arc::new(EmbeddingCache::new(100)),
            SectionConfig::default(),
            TimeoutConfig::default(),
        )
    }

    fn ids(finding_ids: &[&str]) -> Vec<String> {
        finding_ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn restricts_to_section_and_allowlist() {
        let retriever = retriever_with(
            vec![
                passage("c1", "f1", "rationale", 0, "매출누락 확인"),
                passage("c2", "f1", "method", 0, "매출누락 확인"),
                passage("c3", "f2", "rationale", 0, "매출누락 확인"),
            ],
            Vec::new(),
            false,
        )
        .await;

        let hits = retriever
            .retrieve_section(
                "매출누락",
                "rationale",
                &ids(&["f1"]),
                &SearchFilters::default(),
                10,
            )
            .await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[0].section, "rationale");
        assert!(hits[0].score_lexical > 0.0);
    }

    #[tokio::test]
    async fn vector_only_hits_backfill_their_text() {
        // stored text shares no token with the query, so the lexical leg
        // misses it; the vector leg still lands on the chunk and the
        // point lookup restores the text the payload dropped
        let record = passage("c1", "f1", "rationale", 0, "영업외 비용 과다 계상");
        let retriever = retriever_with(
            vec![record.clone()],
            vec![(record, "현금매출 장부 제외".to_string())],
            true,
        )
        .await;

        let hits = retriever
            .retrieve_section(
                "현금매출 장부 제외",
                "rationale",
                &ids(&["f1"]),
                &SearchFilters::default(),
                10,
            )
            .await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "영업외 비용 과다 계상");
        assert_eq!(hits[0].score_lexical, 0.0);
        assert!(hits[0].score_vector > 0.9);
    }

    #[tokio::test]
    async fn unrecoverable_text_drops_the_passage() {
        // known to the vector store only; the point lookup finds nothing
        let record = passage("c9", "f1", "rationale", 0, "");
        let mut orphan = record.clone();
        orphan.text = Some("벡터 전용 본문".to_string());
        let retriever = retriever_with(
            Vec::new(),
            vec![(orphan, "벡터 전용 본문".to_string())],
            true,
        )
        .await;

        let hits = retriever
            .retrieve_section(
                "벡터 전용 본문",
                "rationale",
                &ids(&["f1"]),
                &SearchFilters::default(),
                10,
            )
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_allowlist_returns_nothing() {
        let retriever = retriever_with(
            vec![passage("c1", "f1", "rationale", 0, "매출누락")],
            Vec::new(),
            false,
        )
        .await;

        let hits = retriever
            .retrieve_section("매출누락", "rationale", &[], &SearchFilters::default(), 10)
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn fused_hits_keep_both_leg_scores() {
        let record = passage("c1", "f1", "rationale", 0, "가공경비 계상 확인");
        let retriever = retriever_with(
            vec![record.clone()],
            vec![(record, "가공경비 계상 확인".to_string())],
            false,
        )
        .await;

        let hits = retriever
            .retrieve_section(
                "가공경비 계상 확인",
                "rationale",
                &ids(&["f1"]),
                &SearchFilters::default(),
                10,
            )
            .await;

        assert_eq!(hits.len(), 1);
        assert!(hits[0].score_lexical > 0.0);
        assert!(hits[0].score_vector > 0.9);
        assert!(hits[0].score_combined > 0.0);
    }
}
