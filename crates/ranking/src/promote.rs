use auditctx_model::{KeywordRoleResult, PassageHit, PromotionConfig, RankedBlock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Result of one promotion pass.
///
/// `excluded` keeps every scored candidate that did not make the cut
/// (filtered out, capped out, or past the top-N) so downstream
/// disambiguation can disclose "there were N more matches".
#[derive(Debug, Clone, Default)]
pub struct PromotionOutcome {
    pub accepted: Vec<RankedBlock>,
    pub excluded: Vec<RankedBlock>,
    /// Candidate blocks whose text contained each target keyword.
    pub keyword_matches: BTreeMap<String, u64>,
}

/// Aggregates section-scoped passages into per-finding ranked blocks.
///
/// Findings backed by both section roles are preferred outright when
/// enough of them exist; otherwise every finding is scored as a weighted
/// blend of its two per-role scores.
#[derive(Debug, Clone)]
pub struct BlockPromoter {
    config: PromotionConfig,
}

impl BlockPromoter {
    #[must_use]
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    pub fn promote(
        &self,
        rationale: Vec<PassageHit>,
        method: Vec<PassageHit>,
        roles: &KeywordRoleResult,
    ) -> PromotionOutcome {
        if rationale.is_empty() && method.is_empty() {
            return PromotionOutcome::default();
        }

        let rationale_groups = group_by_finding(rationale);
        let method_groups = group_by_finding(method);

        let intersection: BTreeSet<&String> = rationale_groups
            .keys()
            .filter(|fid| method_groups.contains_key(*fid))
            .collect();

        let mut scored: Vec<(String, f32, Vec<PassageHit>)> = Vec::new();
        if intersection.len() >= self.config.intersection_min {
            log::debug!(
                "promotion: intersection-first over {} findings",
                intersection.len()
            );
            for finding_id in intersection {
                let mut combined = rationale_groups[finding_id].clone();
                combined.extend(method_groups[finding_id].iter().cloned());
                let score = self.dedup_topk_avg(&combined);
                scored.push((finding_id.clone(), score, combined));
            }
        } else {
            log::debug!(
                "promotion: blended union (intersection size {})",
                intersection.len()
            );
            let union: BTreeSet<&String> =
                rationale_groups.keys().chain(method_groups.keys()).collect();
            for finding_id in union {
                let from_rationale = rationale_groups.get(finding_id);
                let from_method = method_groups.get(finding_id);
                let score = self.config.rationale_weight
                    * from_rationale.map_or(0.0, |group| self.dedup_topk_avg(group))
                    + self.config.method_weight
                        * from_method.map_or(0.0, |group| self.dedup_topk_avg(group));

                let mut combined = from_rationale.cloned().unwrap_or_default();
                combined.extend(from_method.iter().flat_map(|group| group.iter().cloned()));
                scored.push((finding_id.clone(), score, combined));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let targets = &roles.target_keywords;
        let mut keyword_matches: BTreeMap<String, u64> =
            targets.iter().map(|kw| (kw.clone(), 0)).collect();

        let mut doc_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut outcome = PromotionOutcome::default();

        for (finding_id, score, passages) in scored {
            let Some(block) = build_block(finding_id, score, passages) else {
                continue;
            };

            let block_text = block
                .passages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let mut matched_any = false;
            for keyword in targets {
                if block_text.contains(keyword) {
                    matched_any = true;
                    *keyword_matches.entry(keyword.clone()).or_default() += 1;
                }
            }

            // target keywords filter blocks; context keywords already
            // scoped the document set upstream
            if !targets.is_empty() && !matched_any {
                outcome.excluded.push(block);
                continue;
            }
            if outcome.accepted.len() >= self.config.final_top_n {
                outcome.excluded.push(block);
                continue;
            }
            let per_doc = doc_counts.entry(block.doc_id.clone()).or_insert(0);
            if *per_doc >= self.config.max_blocks_per_doc {
                outcome.excluded.push(block);
                continue;
            }
            *per_doc += 1;
            outcome.accepted.push(block);
        }

        outcome.keyword_matches = keyword_matches;
        log::debug!(
            "promotion: {} accepted, {} excluded",
            outcome.accepted.len(),
            outcome.excluded.len()
        );
        outcome
    }

    /// Block score: keep only the best passage per distinct section name,
    /// then average the top-k remaining combined scores. One section with
    /// many low-value passages cannot inflate the block this way.
    #[must_use]
    pub fn dedup_topk_avg(&self, passages: &[PassageHit]) -> f32 {
        if passages.is_empty() {
            return 0.0;
        }

        let mut ranked: Vec<&PassageHit> = passages.iter().collect();
        ranked.sort_by(|a, b| {
            b.score_combined
                .partial_cmp(&a.score_combined)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let mut seen_sections = BTreeSet::new();
        let top: Vec<f32> = ranked
            .into_iter()
            .filter(|p| seen_sections.insert(p.section.clone()))
            .take(self.config.dedup_top_k)
            .map(|p| p.score_combined)
            .collect();

        if top.is_empty() {
            return 0.0;
        }
        top.iter().sum::<f32>() / top.len() as f32
    }
}

fn group_by_finding(passages: Vec<PassageHit>) -> BTreeMap<String, Vec<PassageHit>> {
    let mut groups: BTreeMap<String, Vec<PassageHit>> = BTreeMap::new();
    for passage in passages {
        groups
            .entry(passage.finding_id.clone())
            .or_default()
            .push(passage);
    }
    groups
}

fn build_block(
    finding_id: String,
    score: f32,
    mut passages: Vec<PassageHit>,
) -> Option<RankedBlock> {
    let first = passages.first()?;
    let doc_id = first.doc_id.clone();
    let item = first.item.clone();
    let code = first.code.clone();
    let sections: BTreeSet<String> = passages.iter().map(|p| p.section.clone()).collect();

    passages.sort_by(|a, b| {
        b.score_combined
            .partial_cmp(&a.score_combined)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    Some(RankedBlock {
        finding_id,
        doc_id,
        item,
        code,
        score,
        passages,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn passage(chunk: &str, finding: &str, doc: &str, section: &str, score: f32) -> PassageHit {
        PassageHit {
            chunk_id: chunk.to_string(),
            finding_id: finding.to_string(),
            doc_id: doc.to_string(),
            section: section.to_string(),
            section_order: 0,
            passage_order: 0,
            code: None,
            item: Some("품목".to_string()),
            item_norm: None,
            page: None,
            start_line: None,
            end_line: None,
            text: format!("{section} 본문"),
            text_norm: None,
            score_lexical: 0.0,
            score_vector: 0.0,
            score_field: 0.0,
            score_combined: score,
        }
    }

    fn with_text(mut p: PassageHit, text: &str) -> PassageHit {
        p.text = text.to_string();
        p
    }

    fn no_roles() -> KeywordRoleResult {
        KeywordRoleResult::empty()
    }

    fn target_roles(targets: &[&str]) -> KeywordRoleResult {
        KeywordRoleResult {
            target_keywords: targets.iter().map(|t| t.to_string()).collect(),
            ..KeywordRoleResult::empty()
        }
    }

    fn promoter() -> BlockPromoter {
        BlockPromoter::new(PromotionConfig::default())
    }

    #[test]
    fn dedup_keeps_only_the_best_passage_per_section() {
        let passages = vec![
            passage("c1", "f1", "d1", "rationale", 0.9),
            passage("c2", "f1", "d1", "rationale", 0.5),
            passage("c3", "f1", "d1", "method", 0.3),
        ];
        // (0.9 + 0.3) / 2; the 0.5 duplicate section never contributes
        let score = promoter().dedup_topk_avg(&passages);
        assert!((score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn dedup_averages_at_most_top_k() {
        let passages = vec![
            passage("c1", "f1", "d1", "a", 1.0),
            passage("c2", "f1", "d1", "b", 0.8),
            passage("c3", "f1", "d1", "c", 0.6),
            passage("c4", "f1", "d1", "d", 0.0),
        ];
        let score = promoter().dedup_topk_avg(&passages);
        assert!((score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn intersection_first_when_enough_findings_have_both_roles() {
        let rationale = vec![
            passage("r1", "f1", "d1", "rationale", 0.9),
            passage("r2", "f2", "d2", "rationale", 0.8),
            passage("r3", "f3", "d3", "rationale", 0.7),
        ];
        let method = vec![
            passage("m1", "f1", "d1", "method", 0.9),
            passage("m2", "f2", "d2", "method", 0.2),
        ];

        let outcome = promoter().promote(rationale, method, &no_roles());

        // f3 has no method passages and the intersection is big enough,
        // so it never becomes a candidate
        let ids: Vec<&str> = outcome
            .accepted
            .iter()
            .map(|b| b.finding_id.as_str())
            .collect();
        assert_eq!(ids, vec!["f1", "f2"]);
        assert!(outcome.accepted[0].score > outcome.accepted[1].score);
    }

    #[test]
    fn small_intersection_blends_the_union() {
        let rationale = vec![
            passage("r1", "f1", "d1", "rationale", 0.8),
            passage("r2", "f2", "d2", "rationale", 0.6),
        ];
        let method = vec![passage("m1", "f1", "d1", "method", 0.4)];

        let outcome = promoter().promote(rationale, method, &no_roles());

        // intersection {f1} is below the minimum of 2: blended path
        let by_id: BTreeMap<&str, f32> = outcome
            .accepted
            .iter()
            .map(|b| (b.finding_id.as_str(), b.score))
            .collect();
        // f1: 0.5*0.8 + 0.5*0.4; f2: 0.5*0.6 + 0.5*0.0
        assert!((by_id["f1"] - 0.6).abs() < 1e-6);
        assert!((by_id["f2"] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn target_keywords_filter_blocks_with_or_semantics() {
        let rationale = vec![
            with_text(passage("r1", "f1", "d1", "rationale", 0.9), "미환류소득 적출"),
            with_text(passage("r2", "f2", "d2", "rationale", 0.8), "다른 항목"),
        ];

        let outcome = promoter().promote(
            rationale,
            Vec::new(),
            &target_roles(&["미환류소득", "대리납부"]),
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].finding_id, "f1");
        assert_eq!(outcome.excluded.len(), 1);
        assert_eq!(outcome.excluded[0].finding_id, "f2");
        assert_eq!(outcome.keyword_matches["미환류소득"], 1);
        assert_eq!(outcome.keyword_matches["대리납부"], 0);
    }

    #[test]
    fn per_doc_cap_diversifies_accepted_blocks() {
        let mut config = PromotionConfig::default();
        config.final_top_n = 10;
        let promoter = BlockPromoter::new(config);

        let rationale = vec![
            passage("r1", "f1", "d1", "rationale", 0.9),
            passage("r2", "f2", "d1", "rationale", 0.8),
            passage("r3", "f3", "d1", "rationale", 0.7),
            passage("r4", "f4", "d2", "rationale", 0.6),
        ];

        let outcome = promoter.promote(rationale, Vec::new(), &no_roles());

        let from_d1 = outcome
            .accepted
            .iter()
            .filter(|b| b.doc_id == "d1")
            .count();
        assert_eq!(from_d1, 2);
        // the third d1 block is retained as excluded-but-scored
        assert!(outcome
            .excluded
            .iter()
            .any(|b| b.finding_id == "f3" && b.score > 0.0));
        assert!(outcome.accepted.iter().any(|b| b.finding_id == "f4"));
    }

    #[test]
    fn overflow_past_final_top_n_is_excluded_not_dropped() {
        let rationale: Vec<PassageHit> = (0..6)
            .map(|i| {
                passage(
                    &format!("r{i}"),
                    &format!("f{i}"),
                    &format!("d{i}"),
                    "rationale",
                    1.0 - i as f32 * 0.1,
                )
            })
            .collect();

        let outcome = promoter().promote(rationale, Vec::new(), &no_roles());

        assert_eq!(outcome.accepted.len(), 3);
        assert_eq!(outcome.excluded.len(), 3);
    }

    #[test]
    fn block_passages_are_sorted_by_combined_score() {
        let rationale = vec![
            passage("r1", "f1", "d1", "rationale", 0.2),
            passage("r2", "f1", "d1", "other", 0.9),
        ];

        let outcome = promoter().promote(rationale, Vec::new(), &no_roles());
        let block = &outcome.accepted[0];
        assert_eq!(block.passages[0].chunk_id, "r2");
        assert_eq!(block.passages[1].chunk_id, "r1");
        assert_eq!(
            block.sections,
            BTreeSet::from(["rationale".to_string(), "other".to_string()])
        );
    }

    #[test]
    fn no_passages_means_no_blocks() {
        let outcome = promoter().promote(Vec::new(), Vec::new(), &no_roles());
        assert!(outcome.accepted.is_empty());
        assert!(outcome.excluded.is_empty());
    }
}
