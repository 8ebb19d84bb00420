use crate::request::{Clarification, ContextBundle, ContextRequest, ContextResponse};
use auditctx_backend::{Embedder, EmbeddingCache, LexicalBackend, VectorBackend, Vocabulary};
use auditctx_model::EngineConfig;
use auditctx_ranking::{BlockPromoter, ContextPacker};
use auditctx_retrieval::{
    DocumentScope, FindingRetriever, KeywordDocumentResolver, KeywordRoleClassifier,
    RoleClassifier, SearchFilters, SectionChunkRetriever,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The assembled retrieval pipeline.
///
/// Request-scoped throughout: every query allocates its own hits, blocks
/// and citations, and the whole future can be dropped at any await point
/// to cancel. The only shared mutable state are the two bounded caches
/// inside the resolver and the embedding cache, both LRU behind a mutex.
pub struct ContextEngine {
    config: EngineConfig,
    resolver: KeywordDocumentResolver,
    classifier: KeywordRoleClassifier,
    findings: FindingRetriever,
    sections: SectionChunkRetriever,
    promoter: BlockPromoter,
    packer: ContextPacker,
}

impl ContextEngine {
    /// Wire the pipeline with the deterministic rule fallback for
    /// dictionary-unknown keywords.
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        vocabulary: Arc<Vocabulary>,
        config: EngineConfig,
    ) -> Self {
        let classifier =
            KeywordRoleClassifier::with_rule_fallback(vocabulary, config.classifier.clone());
        Self::assemble(lexical, vector, embedder, classifier, config)
    }

    /// Same wiring with a custom secondary classifier (an LLM adapter in
    /// production).
    #[must_use]
    pub fn with_classifier(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        vocabulary: Arc<Vocabulary>,
        secondary: Arc<dyn RoleClassifier>,
        config: EngineConfig,
    ) -> Self {
        let classifier =
            KeywordRoleClassifier::new(vocabulary, secondary, config.classifier.clone());
        Self::assemble(lexical, vector, embedder, classifier, config)
    }

    fn assemble(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        classifier: KeywordRoleClassifier,
        config: EngineConfig,
    ) -> Self {
        let embeddings = Arc::new(EmbeddingCache::new(
            config.sections.embedding_cache_capacity,
        ));
        let resolver = KeywordDocumentResolver::new(
            Arc::clone(&lexical),
            config.resolver.clone(),
            config.timeouts.clone(),
        );
        let findings = FindingRetriever::new(
            Arc::clone(&lexical),
            Arc::clone(&vector),
            Arc::clone(&embedder),
            Arc::clone(&embeddings),
            config.findings.clone(),
            config.timeouts.clone(),
        );
        let sections = SectionChunkRetriever::new(
            lexical,
            vector,
            embedder,
            embeddings,
            config.sections.clone(),
            config.timeouts.clone(),
        );
        let promoter = BlockPromoter::new(config.promotion.clone());
        let packer = ContextPacker::new(config.packing.clone());

        Self {
            config,
            resolver,
            classifier,
            findings,
            sections,
            promoter,
            packer,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Classification gates first; a gated request never touches the
    /// ranking stages. Backend trouble downstream degrades quality
    /// silently; only confirmation and "no matches" come back as
    /// action-requiring states.
    pub async fn answer_context(&self, request: &ContextRequest) -> ContextResponse {
        let roles = self
            .classifier
            .classify(&request.query, &request.keywords)
            .await;
        if roles.needs_confirmation {
            log::info!(
                "deferring ranking: keyword roles need confirmation \
                 (confidence {:.2})",
                roles.confidence
            );
            return ContextResponse::NeedsConfirmation(Clarification {
                confidence: roles.confidence,
                context_keywords: roles.context_keywords,
                target_keywords: roles.target_keywords,
                unknown_keywords: roles.unknown_keywords,
            });
        }

        let scope = self.resolver.scope(&request.keywords).await;
        let degraded_scope = scope.is_degraded();

        let keyword_frequency = match (&scope, request.keywords.len()) {
            (DocumentScope::Scoped { doc_ids, degraded: false }, n) if n >= 2 => {
                self.resolver
                    .document_frequency(doc_ids, &request.keywords)
                    .await
            }
            _ => BTreeMap::new(),
        };

        let findings = self
            .findings
            .retrieve(&request.query, &request.keywords, &scope, &request.filters)
            .await;
        if findings.is_empty() {
            log::info!("no finding candidates for query");
            return ContextResponse::NoMatches {
                roles,
                degraded_scope,
                excluded_blocks: Vec::new(),
            };
        }
        let finding_ids: Vec<String> = findings.iter().map(|f| f.finding_id.clone()).collect();

        let section_filters = self.section_filters(request, &scope);
        let rationale_query = join_query(&request.rationale_hints, &request.query);
        let method_query = join_query(&request.method_hints, &request.query);
        let top_n = self.config.sections.candidates_per_leg;

        // the two section roles are independent; retrieve them together
        let (rationale_hits, method_hits) = tokio::join!(
            self.sections.retrieve_section(
                &rationale_query,
                &self.config.sections.rationale_section,
                &finding_ids,
                &section_filters,
                top_n,
            ),
            self.sections.retrieve_section(
                &method_query,
                &self.config.sections.method_section,
                &finding_ids,
                &section_filters,
                top_n,
            ),
        );

        let outcome = self.promoter.promote(rationale_hits, method_hits, &roles);
        if outcome.accepted.is_empty() {
            return ContextResponse::NoMatches {
                roles,
                degraded_scope,
                excluded_blocks: outcome.excluded,
            };
        }

        let context = self.packer.pack(&outcome.accepted);
        ContextResponse::Ready(Box::new(ContextBundle {
            context,
            blocks: outcome.accepted,
            excluded_blocks: outcome.excluded,
            findings,
            roles,
            keyword_frequency,
            keyword_block_matches: outcome.keyword_matches,
            degraded_scope,
        }))
    }

    /// Section retrieval inherits the request filters, narrowed to the
    /// scoped documents when a scope exists.
    fn section_filters(&self, request: &ContextRequest, scope: &DocumentScope) -> SearchFilters {
        let mut filters = request.filters.clone();
        if let Some(doc_ids) = scope.doc_ids() {
            filters.doc_ids = doc_ids.to_vec();
        }
        filters
    }
}

fn join_query(hints: &[String], free_text: &str) -> String {
    if hints.is_empty() {
        return free_text.to_string();
    }
    let mut parts: Vec<&str> = hints.iter().map(String::as_str).collect();
    parts.push(free_text);
    parts.join(" ").trim().to_string()
}
