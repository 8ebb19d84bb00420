use auditctx_model::{Citation, PackedContext, PackingConfig, PassageHit, RankedBlock};
use std::collections::BTreeMap;

/// Assembles ranked blocks into one budgeted text package with
/// per-passage citations.
///
/// The budget is an estimate (four characters per token) and is only
/// ever crossed by the passage that crosses it: truncation happens at a
/// passage boundary, never mid-passage.
#[derive(Debug, Clone)]
pub struct ContextPacker {
    config: PackingConfig,
}

impl ContextPacker {
    #[must_use]
    pub fn new(config: PackingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn pack(&self, blocks: &[RankedBlock]) -> PackedContext {
        if blocks.is_empty() {
            return PackedContext::default();
        }

        let mut parts: Vec<String> = Vec::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut tokens = 0usize;

        'blocks: for (index, block) in blocks.iter().enumerate() {
            if tokens >= self.config.token_budget {
                break;
            }

            let header = block_header(index + 1, block);
            tokens += estimate_tokens(&header);
            parts.push(header);

            for (section, passages) in self.sections_in_priority_order(block) {
                let heading = format!("### {section}\n");
                tokens += estimate_tokens(&heading);
                parts.push(heading);

                for passage in passages {
                    let body = passage_body(&passage);
                    tokens += estimate_tokens(&body);
                    parts.push(body);
                    citations.push(citation(&passage));

                    if tokens >= self.config.token_budget {
                        break 'blocks;
                    }
                }
            }
        }

        let mut cited_findings = Vec::new();
        for citation in &citations {
            if !cited_findings.contains(&citation.finding_id) {
                cited_findings.push(citation.finding_id.clone());
            }
        }

        log::debug!(
            "packed {} citations, ~{tokens} tokens (budget {})",
            citations.len(),
            self.config.token_budget
        );
        PackedContext {
            text: parts.concat(),
            citations,
            cited_findings,
        }
    }

    /// Per-section passage lists in the canonical priority order, each
    /// capped, ordered by position, and adjacency-merged.
    fn sections_in_priority_order(&self, block: &RankedBlock) -> Vec<(String, Vec<PassageHit>)> {
        let mut by_section: BTreeMap<&str, Vec<&PassageHit>> = BTreeMap::new();
        for passage in &block.passages {
            by_section.entry(&passage.section).or_default().push(passage);
        }

        let priority: BTreeMap<&str, usize> = self
            .config
            .section_priority
            .iter()
            .enumerate()
            .map(|(rank, name)| (name.as_str(), rank))
            .collect();

        let mut sections: Vec<(&str, Vec<&PassageHit>)> = by_section.into_iter().collect();
        sections.sort_by(|a, b| {
            let rank_a = priority.get(a.0).copied().unwrap_or(usize::MAX);
            let rank_b = priority.get(b.0).copied().unwrap_or(usize::MAX);
            rank_a.cmp(&rank_b).then_with(|| a.0.cmp(b.0))
        });

        sections
            .into_iter()
            .map(|(name, mut passages)| {
                passages.sort_by_key(|p| (p.position(), p.chunk_id.clone()));
                let mut selected: Vec<PassageHit> = passages
                    .into_iter()
                    .take(self.config.passages_per_block)
                    .cloned()
                    .collect();
                if self.config.merge_adjacent {
                    selected = merge_adjacent(selected);
                }
                (name.to_string(), selected)
            })
            .collect()
    }
}

/// Join runs of neighbouring passages (same finding, same section,
/// passage order stepping by one) into single units with their line
/// ranges unioned, so citations do not point at fragmented sentences.
fn merge_adjacent(passages: Vec<PassageHit>) -> Vec<PassageHit> {
    let mut passages = passages.into_iter();
    let Some(mut current) = passages.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in passages {
        let adjacent = current.finding_id == next.finding_id
            && current.section == next.section
            && current.passage_order + 1 == next.passage_order;
        if adjacent {
            current.text.push('\n');
            current.text.push_str(&next.text);
            current.start_line = union_min(current.start_line, next.start_line);
            current.end_line = union_max(current.end_line, next.end_line);
            current.passage_order = next.passage_order;
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

fn union_min(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn union_max(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn block_header(number: usize, block: &RankedBlock) -> String {
    let sections: Vec<&str> = block.sections.iter().map(String::as_str).collect();
    format!(
        "\n## Block {number}\n- document: {}\n- finding: {}\n- item: {}\n- code: {}\n- sections: {}\n\n",
        block.doc_id,
        block.finding_id,
        block.item.as_deref().unwrap_or("-"),
        block.code.as_deref().unwrap_or("-"),
        sections.join(", "),
    )
}

fn passage_body(passage: &PassageHit) -> String {
    format!(
        "{}\n(source: p.{}, L{}-{})\n\n",
        passage.text,
        display_or_dash(passage.page),
        display_or_dash(passage.start_line),
        display_or_dash(passage.end_line),
    )
}

fn display_or_dash(value: Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn citation(passage: &PassageHit) -> Citation {
    Citation {
        doc_id: passage.doc_id.clone(),
        finding_id: passage.finding_id.clone(),
        chunk_id: passage.chunk_id.clone(),
        page: passage.page,
        start_line: passage.start_line,
        end_line: passage.end_line,
        text: passage.text.clone(),
        section: passage.section.clone(),
    }
}

/// Four characters per token is a workable estimate for this corpus.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}
