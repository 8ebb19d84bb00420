use crate::error::Result;
use async_trait::async_trait;
use auditctx_backend::{KeywordRole, Vocabulary};
use auditctx_model::{ClassifierConfig, KeywordRoleResult};
use std::sync::Arc;

/// Role split produced by a secondary classifier for the keywords the
/// dictionary could not place.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondarySplit {
    pub context_keywords: Vec<String>,
    pub target_keywords: Vec<String>,
    pub confidence: f32,
}

/// Pluggable classifier for dictionary-unknown keywords.
///
/// Production wires an LLM adapter here; it is a non-deterministic,
/// mockable boundary. Any error it returns is recovered by the
/// deterministic rule, never propagated.
#[async_trait]
pub trait RoleClassifier: Send + Sync {
    async fn classify(&self, query: &str, unknown: &[String]) -> Result<SecondarySplit>;
}

/// Deterministic default: unclassified keywords become targets.
///
/// Matches the recovery behavior of the secondary-classifier failure
/// path, so the pipeline behaves identically with or without a secondary
/// classifier installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedClassifier;

#[async_trait]
impl RoleClassifier for RuleBasedClassifier {
    async fn classify(&self, _query: &str, unknown: &[String]) -> Result<SecondarySplit> {
        Ok(SecondarySplit {
            context_keywords: Vec::new(),
            target_keywords: unknown.to_vec(),
            confidence: 0.5,
        })
    }
}

/// Splits a keyword list into context and target roles: dictionary
/// first, secondary classifier for the remainder.
pub struct KeywordRoleClassifier {
    vocabulary: Arc<Vocabulary>,
    secondary: Arc<dyn RoleClassifier>,
    config: ClassifierConfig,
}

impl KeywordRoleClassifier {
    #[must_use]
    pub fn new(
        vocabulary: Arc<Vocabulary>,
        secondary: Arc<dyn RoleClassifier>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            vocabulary,
            secondary,
            config,
        }
    }

    /// Dictionary-only setup with the rule-based fallback.
    #[must_use]
    pub fn with_rule_fallback(vocabulary: Arc<Vocabulary>, config: ClassifierConfig) -> Self {
        Self::new(vocabulary, Arc::new(RuleBasedClassifier), config)
    }

    pub async fn classify(&self, query: &str, keywords: &[String]) -> KeywordRoleResult {
        if keywords.is_empty() {
            return KeywordRoleResult::empty();
        }

        let mut context = Vec::new();
        let mut target = Vec::new();
        let mut unknown = Vec::new();
        for keyword in keywords {
            match self.vocabulary.lookup(keyword) {
                Some(KeywordRole::Context) => context.push(keyword.clone()),
                Some(KeywordRole::Target) => target.push(keyword.clone()),
                None => unknown.push(keyword.clone()),
            }
        }
        log::debug!(
            "dictionary split: context={context:?} target={target:?} unknown={unknown:?}"
        );

        let covered = context.len() + target.len();
        let coverage = covered as f32 / keywords.len() as f32;

        let confidence = if unknown.is_empty() {
            self.config.dictionary_confidence
        } else {
            let split = match self.secondary.classify(query, &unknown).await {
                Ok(split) => split,
                Err(err) => {
                    log::warn!("secondary classifier failed, using rule fallback: {err}");
                    SecondarySplit {
                        context_keywords: Vec::new(),
                        target_keywords: unknown.clone(),
                        confidence: 0.5,
                    }
                }
            };
            let (secondary_context, secondary_target) = constrain_split(&split, &unknown);
            context.extend(secondary_context);
            target.extend(secondary_target);

            coverage * self.config.dictionary_confidence + (1.0 - coverage) * split.confidence
        };

        let needs_confirmation = confidence < self.config.confidence_floor
            || (context.is_empty() && target.len() >= self.config.max_targets_without_context);
        if needs_confirmation {
            log::warn!(
                "keyword roles need confirmation (confidence {confidence:.2}, \
                 {} context / {} target)",
                context.len(),
                target.len()
            );
        }

        KeywordRoleResult {
            context_keywords: context,
            target_keywords: target,
            confidence,
            needs_confirmation,
            unknown_keywords: unknown,
        }
    }
}

/// Restrict a secondary split to the keywords it was asked about; any it
/// failed to place become targets, so every keyword lands in exactly one
/// role.
fn constrain_split(split: &SecondarySplit, unknown: &[String]) -> (Vec<String>, Vec<String>) {
    let mut context = Vec::new();
    let mut target = Vec::new();
    for keyword in unknown {
        if split.context_keywords.contains(keyword) {
            context.push(keyword.clone());
        } else {
            target.push(keyword.clone());
        }
    }
    (context, target)
}
