//! Confidence modifier data model and registry
//!
//! Modifiers are data, not code. Each one names the filter types it applies
//! to (empty = all), a context condition, and an action on the span's
//! confidence. The registry compiles regex conditions once at registration
//! and maintains the keyword index the batch engine uses for its two-tier
//! window scan.

use crate::confidence::keywords::KeywordIndex;
use crate::error::{Error, Result};
use crate::span::FilterType;
use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_reach() -> usize {
    40
}

/// Context condition a modifier tests before firing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModifierCondition {
    /// Literal substring within `reach` bytes before the span
    TextBefore {
        value: String,
        #[serde(default = "default_reach")]
        reach: usize,
    },

    /// Literal substring within `reach` bytes after the span
    TextAfter {
        value: String,
        #[serde(default = "default_reach")]
        reach: usize,
    },

    /// Literal substring within `reach` bytes on either side
    TextSurrounding {
        value: String,
        #[serde(default = "default_reach")]
        reach: usize,
    },

    /// Regex match within `reach` bytes on either side
    RegexSurrounding {
        pattern: String,
        #[serde(default = "default_reach")]
        reach: usize,
    },

    /// Any of these keywords present in the span's context window
    WindowKeyword { keywords: Vec<String> },

    /// Regex match against any context window token
    WindowPattern { pattern: String },
}

/// Action applied to confidence when the condition fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierAction {
    /// Replace confidence with the modifier value
    Override,

    /// Additive adjustment in log-odds space
    Delta,

    /// Multiply confidence by the modifier value
    Multiply,
}

/// A single confidence adjustment rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceModifier {
    /// Rule name, for logs and diagnostics
    pub name: String,

    /// Filter types this rule applies to; empty applies to all
    #[serde(default)]
    pub filter_types: Vec<FilterType>,

    /// Context condition
    pub condition: ModifierCondition,

    /// Confidence action
    pub action: ModifierAction,

    /// Action operand
    pub value: f64,
}

/// A modifier with its regex condition compiled once at registration.
#[derive(Debug, Clone)]
pub struct CompiledModifier {
    pub spec: ConfidenceModifier,
    pub regex: Option<Regex>,
}

impl CompiledModifier {
    fn compile(spec: ConfidenceModifier) -> Result<Self> {
        let regex = match &spec.condition {
            ModifierCondition::RegexSurrounding { pattern, .. }
            | ModifierCondition::WindowPattern { pattern } => {
                Some(Regex::new(pattern).map_err(|e| {
                    Error::Config(format!(
                        "Invalid regex in modifier '{}': {}",
                        spec.name, e
                    ))
                })?)
            }
            _ => None,
        };
        Ok(Self { spec, regex })
    }

    /// True when this rule applies to the given filter type.
    pub fn applies_to(&self, filter_type: FilterType) -> bool {
        self.spec.filter_types.is_empty() || self.spec.filter_types.contains(&filter_type)
    }

    /// Whether applying this rule would raise the given confidence.
    ///
    /// Used by the ceiling/floor short-circuit: near-certain spans only
    /// evaluate penalties, near-zero spans only evaluate boosts.
    pub fn is_boost(&self, current: f64) -> bool {
        match self.spec.action {
            ModifierAction::Override => self.spec.value > current,
            ModifierAction::Delta => self.spec.value > 0.0,
            ModifierAction::Multiply => self.spec.value > 1.0,
        }
    }
}

/// Registry of compiled modifiers plus the keyword index over every
/// `WindowKeyword` condition.
///
/// Invariant: the keyword index is rebuilt whenever a modifier is added, so
/// the batch engine's window scan always sees the full keyword population.
#[derive(Debug)]
pub struct ModifierRegistry {
    modifiers: Vec<CompiledModifier>,
    keyword_index: KeywordIndex,
    fp_rate: f64,
}

impl ModifierRegistry {
    /// Create an empty registry.
    pub fn new(fp_rate: f64) -> Self {
        Self {
            modifiers: Vec::new(),
            keyword_index: KeywordIndex::build(std::iter::empty(), fp_rate),
            fp_rate,
        }
    }

    /// Create a registry seeded with the default rule set.
    pub fn with_defaults(fp_rate: f64) -> Result<Self> {
        let mut registry = Self::new(fp_rate);
        for modifier in default_modifiers() {
            registry.add(modifier)?;
        }
        Ok(registry)
    }

    /// Add a modifier, compiling its condition and rebuilding the keyword
    /// index.
    pub fn add(&mut self, modifier: ConfidenceModifier) -> Result<()> {
        self.modifiers.push(CompiledModifier::compile(modifier)?);
        self.rebuild_index();
        Ok(())
    }

    fn rebuild_index(&mut self) {
        let keywords = self.modifiers.iter().flat_map(|m| {
            if let ModifierCondition::WindowKeyword { keywords } = &m.spec.condition {
                keywords.clone()
            } else {
                Vec::new()
            }
        });
        self.keyword_index = KeywordIndex::build(keywords, self.fp_rate);
    }

    /// Registered modifiers in registration order.
    pub fn modifiers(&self) -> &[CompiledModifier] {
        &self.modifiers
    }

    /// Keyword index over all `WindowKeyword` conditions.
    pub fn keyword_index(&self) -> &KeywordIndex {
        &self.keyword_index
    }

    /// Number of registered modifiers.
    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    /// True when no modifiers are registered.
    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }
}

/// Default adjustment rules shipped with the engine.
pub fn default_modifiers() -> Vec<ConfidenceModifier> {
    vec![
        ConfidenceModifier {
            name: "ssn_context_boost".to_string(),
            filter_types: vec![FilterType::Ssn],
            condition: ModifierCondition::WindowKeyword {
                keywords: vec![
                    "ssn".to_string(),
                    "social".to_string(),
                    "security".to_string(),
                ],
            },
            action: ModifierAction::Delta,
            value: 0.3,
        },
        ConfidenceModifier {
            name: "mrn_context_boost".to_string(),
            filter_types: vec![FilterType::Mrn],
            condition: ModifierCondition::WindowKeyword {
                keywords: vec![
                    "mrn".to_string(),
                    "medical".to_string(),
                    "record".to_string(),
                    "chart".to_string(),
                ],
            },
            action: ModifierAction::Delta,
            value: 0.3,
        },
        ConfidenceModifier {
            name: "phone_label_boost".to_string(),
            filter_types: vec![FilterType::Phone],
            condition: ModifierCondition::WindowKeyword {
                keywords: vec![
                    "phone".to_string(),
                    "tel".to_string(),
                    "call".to_string(),
                    "cell".to_string(),
                ],
            },
            action: ModifierAction::Delta,
            value: 0.25,
        },
        ConfidenceModifier {
            name: "dob_context_boost".to_string(),
            filter_types: vec![FilterType::Date],
            condition: ModifierCondition::WindowKeyword {
                keywords: vec!["dob".to_string(), "birth".to_string(), "born".to_string()],
            },
            action: ModifierAction::Delta,
            value: 0.2,
        },
        ConfidenceModifier {
            name: "account_label_boost".to_string(),
            filter_types: vec![FilterType::Account],
            condition: ModifierCondition::TextBefore {
                value: "account".to_string(),
                reach: 40,
            },
            action: ModifierAction::Delta,
            value: 0.25,
        },
        ConfidenceModifier {
            name: "provider_title_boost".to_string(),
            filter_types: vec![FilterType::ProviderName],
            condition: ModifierCondition::RegexSurrounding {
                pattern: r"(?i)\b(dr|md|physician|provider|attending)\b".to_string(),
                reach: 40,
            },
            action: ModifierAction::Delta,
            value: 0.2,
        },
        ConfidenceModifier {
            name: "example_text_penalty".to_string(),
            filter_types: Vec::new(),
            condition: ModifierCondition::TextSurrounding {
                value: "example".to_string(),
                reach: 40,
            },
            action: ModifierAction::Delta,
            value: -0.4,
        },
        ConfidenceModifier {
            name: "test_data_penalty".to_string(),
            filter_types: Vec::new(),
            condition: ModifierCondition::RegexSurrounding {
                pattern: r"(?i)\b(test|sample|dummy|placeholder)\b".to_string(),
                reach: 40,
            },
            action: ModifierAction::Delta,
            value: -0.35,
        },
        ConfidenceModifier {
            name: "masked_value_penalty".to_string(),
            filter_types: Vec::new(),
            condition: ModifierCondition::WindowPattern {
                pattern: r"^[xX*#]{2,}$".to_string(),
            },
            action: ModifierAction::Multiply,
            value: 0.5,
        },
    ]
}
