//! Confidence modifier engine
//!
//! Adjusts span confidence using surrounding-text evidence. Modifiers are
//! data, not code: a registry holds a default rule set plus caller-added
//! rules, and the engine applies whichever rules match a span's filter type
//! and context. Additive adjustments run in log-odds space so repeated
//! deltas compress gracefully instead of overshooting, and confidence never
//! leaves (0, 1) once a rule has touched it.

mod engine;
mod keywords;
pub mod math;
mod modifier;

pub use engine::ModifierEngine;
pub use keywords::{BloomFilter, KeywordIndex};
pub use modifier::{
    default_modifiers, ConfidenceModifier, ModifierAction, ModifierCondition, ModifierRegistry,
};
