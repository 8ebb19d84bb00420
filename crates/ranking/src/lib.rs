mod pack;
mod promote;

pub use pack::ContextPacker;
pub use promote::{BlockPromoter, PromotionOutcome};
