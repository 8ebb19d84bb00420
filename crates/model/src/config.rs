use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Full configuration for one engine instance.
///
/// Constructor-injected everywhere; there is no process-global config.
/// Every field has a default mirroring the production tuning, so a plain
/// `EngineConfig::default()` is a working setup; TOML/JSON documents only
/// need to override what they care about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub classifier: ClassifierConfig,
    pub findings: FindingConfig,
    pub sections: SectionConfig,
    pub promotion: PromotionConfig,
    pub packing: PackingConfig,
    pub timeouts: TimeoutConfig,
}

impl EngineConfig {
    pub fn from_toml_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = std::str::from_utf8(bytes).context("config is not valid UTF-8")?;
        let config: Self = toml::from_str(raw).context("failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(bytes).context("failed to parse JSON config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.promotion.rationale_weight < 0.0 || self.promotion.method_weight < 0.0 {
            anyhow::bail!("promotion blend weights must be non-negative");
        }
        if self.promotion.dedup_top_k == 0 {
            anyhow::bail!("promotion.dedup_top_k must be at least 1");
        }
        if self.packing.token_budget == 0 {
            anyhow::bail!("packing.token_budget must be positive");
        }
        if self.sections.rationale_section == self.sections.method_section {
            anyhow::bail!("section roles must name two distinct sections");
        }
        Ok(())
    }
}

/// Keyword → document resolution (§ resolver stage).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Documents fetched per keyword before per-document dedup.
    pub keyword_top_n: usize,
    /// At most this many keywords participate in document scoping.
    pub scoping_keywords: usize,
    /// Cap on the union fallback when keyword doc sets never intersect.
    pub union_cap: usize,
    /// Documents sampled for keyword frequency counting.
    pub frequency_docs: usize,
    /// Capacity of the keyword → documents LRU cache.
    pub cache_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            keyword_top_n: 50,
            scoping_keywords: 3,
            union_cap: 30,
            frequency_docs: 5,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Below this confidence the caller must ask for confirmation.
    pub confidence_floor: f32,
    /// Confidence assigned to a pure dictionary classification.
    pub dictionary_confidence: f32,
    /// Zero context keywords alongside this many targets also gates.
    pub max_targets_without_context: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            dictionary_confidence: 0.95,
            max_targets_without_context: 3,
        }
    }
}

/// Finding-level hybrid retrieval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FindingConfig {
    /// Candidates requested from each backend leg.
    pub candidates_per_leg: usize,
    pub top_n: usize,
    pub rrf_k: f32,
    /// Default boost applied to scoping keywords in should clauses.
    pub keyword_boost: f32,
    /// Vector score cutoff used when two or more keywords are in play.
    pub vector_threshold: f32,
    /// With an active document filter, findings scoring below this
    /// fraction of the top combined score are cut.
    pub relative_cutoff: f32,
}

impl Default for FindingConfig {
    fn default() -> Self {
        Self {
            candidates_per_leg: 150,
            top_n: 30,
            rrf_k: 60.0,
            keyword_boost: 3.0,
            vector_threshold: 0.65,
            relative_cutoff: 0.5,
        }
    }
}

/// Section-scoped passage retrieval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SectionConfig {
    pub candidates_per_leg: usize,
    pub rrf_k: f32,
    pub vector_threshold: f32,
    /// Capacity of the query-embedding LRU cache.
    pub embedding_cache_capacity: usize,
    /// Section name carrying the "how the issue was noticed" role.
    pub rationale_section: String,
    /// Section name carrying the "how it was verified" role.
    pub method_section: String,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            candidates_per_leg: 300,
            rrf_k: 60.0,
            vector_threshold: 0.35,
            embedding_cache_capacity: 100,
            rationale_section: "rationale".to_string(),
            method_section: "method".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromotionConfig {
    /// Minimum intersection size for the intersection-first strategy.
    pub intersection_min: usize,
    pub rationale_weight: f32,
    pub method_weight: f32,
    /// Passages averaged per block after section dedup.
    pub dedup_top_k: usize,
    pub max_blocks_per_doc: usize,
    pub final_top_n: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            intersection_min: 2,
            rationale_weight: 0.5,
            method_weight: 0.5,
            dedup_top_k: 3,
            max_blocks_per_doc: 2,
            final_top_n: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackingConfig {
    /// Token budget, estimated at four characters per token.
    pub token_budget: usize,
    pub passages_per_block: usize,
    pub merge_adjacent: bool,
    /// Canonical section order in the packed text. Sections not listed
    /// here come last, ordered by name.
    pub section_priority: Vec<String>,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            passages_per_block: 3,
            merge_adjacent: true,
            section_priority: vec![
                "method".to_string(),
                "reasoning".to_string(),
                "evidence".to_string(),
                "rationale".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub lexical_ms: u64,
    pub vector_ms: u64,
    pub embed_ms: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn lexical(&self) -> Duration {
        Duration::from_millis(self.lexical_ms)
    }

    #[must_use]
    pub fn vector(&self) -> Duration {
        Duration::from_millis(self.vector_ms)
    }

    #[must_use]
    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lexical_ms: 10_000,
            vector_ms: 10_000,
            embed_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.promotion.final_top_n, 3);
        assert_eq!(config.packing.token_budget, 4000);
        assert_eq!(config.sections.vector_threshold, 0.35);
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let raw = br#"
            [promotion]
            final_top_n = 5

            [packing]
            token_budget = 2000
        "#;
        let config = EngineConfig::from_toml_bytes(raw).unwrap();
        assert_eq!(config.promotion.final_top_n, 5);
        assert_eq!(config.packing.token_budget, 2000);
        // untouched sections keep their defaults
        assert_eq!(config.resolver.union_cap, 30);
    }

    #[test]
    fn rejects_identical_section_roles() {
        let raw = br#"
            [sections]
            rationale_section = "same"
            method_section = "same"
        "#;
        assert!(EngineConfig::from_toml_bytes(raw).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw = br#"
            [promotion]
            mmr_lambda = 0.65
        "#;
        assert!(EngineConfig::from_toml_bytes(raw).is_err());
    }
}
