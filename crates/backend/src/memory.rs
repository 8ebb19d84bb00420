//! In-memory reference backends.
//!
//! These back the test suites and give integrators a working engine pair
//! to develop against before wiring real ones: term-overlap scoring for
//! the lexical side, brute-force cosine search for the vector side, and
//! a deterministic feature-hashing embedder.

use crate::embed::Embedder;
use crate::error::{BackendError, Result};
use crate::lexical::{
    field, BoolQuery, FindingRecord, LexicalBackend, PassageRecord, ScoredFinding, ScoredPassage,
};
use crate::vector::{VectorBackend, VectorFilter, VectorQuery};
use async_trait::async_trait;
use ndarray::ArrayView1;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Record shapes that expose their fields by name to query evaluation.
trait Fielded {
    fn value(&self, field: &str) -> Option<&str>;
    fn sort_id(&self) -> &str;
}

impl Fielded for FindingRecord {
    fn value(&self, name: &str) -> Option<&str> {
        match name {
            field::ITEM => self.item.as_deref(),
            field::REASON => self.reason.as_deref(),
            field::DETAIL => self.detail.as_deref(),
            field::TEXT => self.text.as_deref(),
            field::FINDING_ID => Some(&self.finding_id),
            field::DOC_ID => Some(&self.doc_id),
            field::CODE => self.code.as_deref(),
            _ => None,
        }
    }

    fn sort_id(&self) -> &str {
        &self.finding_id
    }
}

impl Fielded for PassageRecord {
    fn value(&self, name: &str) -> Option<&str> {
        match name {
            field::TEXT => self.text.as_deref(),
            field::TEXT_NORM => self.text_norm.as_deref(),
            field::ITEM => self.item.as_deref(),
            field::SECTION => Some(&self.section),
            field::FINDING_ID => Some(&self.finding_id),
            field::DOC_ID => Some(&self.doc_id),
            field::CODE => self.code.as_deref(),
            _ => None,
        }
    }

    fn sort_id(&self) -> &str {
        &self.chunk_id
    }
}

/// Occurrence count of the clause's tokens in the field, times the boost.
fn clause_score<T: Fielded>(record: &T, clause: &crate::lexical::MatchClause) -> f32 {
    let Some(value) = record.value(&clause.field) else {
        return 0.0;
    };
    let mut hits = 0usize;
    for token in clause.query.split_whitespace() {
        hits += value.matches(token).count();
    }
    hits as f32 * clause.boost
}

fn passes_filters<T: Fielded>(record: &T, query: &BoolQuery) -> bool {
    query.filters.iter().all(|filter| {
        record
            .value(&filter.field)
            .is_some_and(|value| filter.values.iter().any(|v| v == value))
    })
}

/// None when the record does not match; Some(score) otherwise.
fn score_record<T: Fielded>(record: &T, query: &BoolQuery) -> Option<f32> {
    if !passes_filters(record, query) {
        return None;
    }

    let mut score = 0.0;
    for clause in &query.must {
        let s = clause_score(record, clause);
        if s <= 0.0 {
            return None;
        }
        score += s;
    }

    let mut should_matched = 0usize;
    for clause in &query.should {
        let s = clause_score(record, clause);
        if s > 0.0 {
            should_matched += 1;
            score += s;
        }
    }
    if should_matched < query.minimum_should_match {
        return None;
    }
    // a filter-only query still matches everything it filters to
    if query.must.is_empty() && query.should.is_empty() && score == 0.0 {
        score = 1.0;
    }

    Some(score)
}

fn run_query<'r, T: Fielded>(records: &'r [T], query: &BoolQuery) -> Vec<(&'r T, f32)> {
    let mut hits: Vec<(&T, f32)> = records
        .iter()
        .filter_map(|record| score_record(record, query).map(|score| (record, score)))
        .collect();
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.sort_id().cmp(b.0.sort_id()))
    });
    if query.size > 0 {
        hits.truncate(query.size);
    }
    hits
}

/// Term-overlap lexical backend over plain vectors of records.
#[derive(Debug, Default)]
pub struct MemoryLexicalBackend {
    findings: Vec<FindingRecord>,
    passages: Vec<PassageRecord>,
}

impl MemoryLexicalBackend {
    #[must_use]
    pub fn new(findings: Vec<FindingRecord>, passages: Vec<PassageRecord>) -> Self {
        Self { findings, passages }
    }

    pub fn add_finding(&mut self, record: FindingRecord) {
        self.findings.push(record);
    }

    pub fn add_passage(&mut self, record: PassageRecord) {
        self.passages.push(record);
    }
}

#[async_trait]
impl LexicalBackend for MemoryLexicalBackend {
    async fn search_findings(&self, query: &BoolQuery) -> Result<Vec<ScoredFinding>> {
        Ok(run_query(&self.findings, query)
            .into_iter()
            .map(|(record, score)| ScoredFinding {
                record: record.clone(),
                score,
            })
            .collect())
    }

    async fn search_passages(&self, query: &BoolQuery) -> Result<Vec<ScoredPassage>> {
        Ok(run_query(&self.passages, query)
            .into_iter()
            .map(|(record, score)| ScoredPassage {
                record: record.clone(),
                score,
            })
            .collect())
    }

    async fn count_findings(&self, query: &BoolQuery) -> Result<u64> {
        let unsized_query = BoolQuery {
            size: 0,
            ..query.clone()
        };
        Ok(run_query(&self.findings, &unsized_query).len() as u64)
    }

    async fn get_passage(&self, chunk_id: &str) -> Result<Option<PassageRecord>> {
        Ok(self
            .passages
            .iter()
            .find(|p| p.chunk_id == chunk_id)
            .cloned())
    }
}

/// Brute-force cosine vector backend.
pub struct MemoryVectorBackend {
    dimension: usize,
    findings: Vec<(FindingRecord, Vec<f32>)>,
    passages: Vec<(PassageRecord, Vec<f32>)>,
    /// Strip text from passage payloads, the way size-constrained vector
    /// stores do; exercises the lexical backfill path.
    omit_passage_text: bool,
}

impl MemoryVectorBackend {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            findings: Vec::new(),
            passages: Vec::new(),
            omit_passage_text: false,
        }
    }

    #[must_use]
    pub fn omitting_passage_text(mut self) -> Self {
        self.omit_passage_text = true;
        self
    }

    pub fn add_finding(&mut self, record: FindingRecord, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        self.findings.push((record, vector));
        Ok(())
    }

    pub fn add_passage(&mut self, record: PassageRecord, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        self.passages.push((record, vector));
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(BackendError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn search<'r, T: Fielded>(
        &self,
        rows: &'r [(T, Vec<f32>)],
        query: &VectorQuery,
    ) -> Result<Vec<(&'r T, f32)>> {
        if query.vector.len() != self.dimension {
            return Err(BackendError::InvalidDimension {
                expected: self.dimension,
                actual: query.vector.len(),
            });
        }

        let mut hits: Vec<(&T, f32)> = rows
            .iter()
            .filter(|(record, _)| passes_vector_filter(record, &query.filter))
            .map(|(record, vector)| (record, cosine(&query.vector, vector)))
            .filter(|(_, score)| *score >= query.score_threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.sort_id().cmp(b.0.sort_id()))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorBackend {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn search_findings(&self, query: &VectorQuery) -> Result<Vec<ScoredFinding>> {
        Ok(self
            .search(&self.findings, query)?
            .into_iter()
            .map(|(record, score)| ScoredFinding {
                record: record.clone(),
                score,
            })
            .collect())
    }

    async fn search_passages(&self, query: &VectorQuery) -> Result<Vec<ScoredPassage>> {
        Ok(self
            .search(&self.passages, query)?
            .into_iter()
            .map(|(record, score)| {
                let mut record = record.clone();
                if self.omit_passage_text {
                    record.text = None;
                    record.text_norm = None;
                }
                ScoredPassage { record, score }
            })
            .collect())
    }
}

fn passes_vector_filter<T: Fielded>(record: &T, filter: &VectorFilter) -> bool {
    let must_ok = filter
        .must
        .iter()
        .all(|m| record.value(&m.field) == Some(m.value.as_str()));
    if !must_ok {
        return false;
    }
    if filter.any_of.is_empty() {
        return true;
    }
    filter
        .any_of
        .iter()
        .any(|m| record.value(&m.field) == Some(m.value.as_str()))
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    a.dot(&b) / denom
}

/// Deterministic feature-hashing embedder.
///
/// Tokens and character bigrams hash into signed buckets; the result is
/// l2-normalized. Not a semantic model, but stable across runs, which is
/// what the tests need, and overlapping texts land near each other.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket =
            u64::from_le_bytes(digest[0..8].try_into().expect("digest is 32 bytes")) as usize
                % self.dimension;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in lowered.split_whitespace() {
            self.add_feature(&mut vector, token, 1.0);
        }
        let chars: Vec<char> = lowered.chars().filter(|c| !c.is_whitespace()).collect();
        for pair in chars.windows(2) {
            let bigram: String = pair.iter().collect();
            self.add_feature(&mut vector, &bigram, 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
