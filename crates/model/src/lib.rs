mod config;
mod types;

pub use config::{
    ClassifierConfig, EngineConfig, FindingConfig, PackingConfig, PromotionConfig, ResolverConfig,
    SectionConfig, TimeoutConfig,
};
pub use types::{
    Citation, DocumentHit, KeywordRoleResult, PackedContext, PassageHit, RankedBlock,
};
