//! Modifier application engine

use crate::config::ConfidenceConfig;
use crate::confidence::modifier::{
    CompiledModifier, ConfidenceModifier, ModifierAction, ModifierCondition, ModifierRegistry,
};
use crate::confidence::math::{sigmoid_delta, soft_clamp};
use crate::error::Result;
use crate::span::Span;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Applies registered confidence modifiers to spans using surrounding-text
/// evidence.
///
/// Evaluation order is registration order. Once a span's confidence reaches
/// the configured ceiling only penalties are evaluated; at the floor only
/// boosts are. Confidence never leaves [0, 1], and any applied action leaves
/// it strictly inside (0, 1).
pub struct ModifierEngine {
    registry: RwLock<ModifierRegistry>,
    config: ConfidenceConfig,
}

impl ModifierEngine {
    /// Create an engine with the default modifier set.
    pub fn new(config: ConfidenceConfig) -> Result<Self> {
        let registry = ModifierRegistry::with_defaults(config.bloom_fp_rate)?;
        Ok(Self {
            registry: RwLock::new(registry),
            config,
        })
    }

    /// Create an engine over an explicit registry.
    pub fn with_registry(config: ConfidenceConfig, registry: ModifierRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            config,
        }
    }

    /// Register an additional modifier.
    pub async fn add_modifier(&self, modifier: ConfidenceModifier) -> Result<()> {
        self.registry.write().await.add(modifier)
    }

    /// Number of registered modifiers.
    pub async fn modifier_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Apply all matching modifiers to one span; returns the new confidence.
    pub async fn apply_modifiers(&self, text: &str, span: &mut Span) -> f64 {
        let registry = self.registry.read().await;
        self.apply_to_span(&registry, text, span)
    }

    /// Apply all matching modifiers to every span in the batch.
    ///
    /// Window-keyword hits are precomputed per span through the two-tier
    /// index, so the cost is O(window tokens + keywords per modifier)
    /// rather than a full window x keyword scan.
    pub async fn apply_modifiers_to_all(&self, text: &str, spans: &mut [Span]) {
        let registry = self.registry.read().await;
        for span in spans.iter_mut() {
            self.apply_to_span(&registry, text, span);
        }
    }

    fn apply_to_span(&self, registry: &ModifierRegistry, text: &str, span: &mut Span) -> f64 {
        let hits = registry.keyword_index().hits_in_window(&span.window);

        for modifier in registry.modifiers() {
            if !modifier.applies_to(span.filter_type) {
                continue;
            }

            let current = span.confidence;
            let is_boost = modifier.is_boost(current);
            if current >= self.config.ceiling && is_boost {
                continue;
            }
            if current <= self.config.floor && !is_boost {
                continue;
            }

            if !condition_met(modifier, text, span, &hits) {
                continue;
            }

            span.confidence = apply_action(modifier, current);
            tracing::trace!(
                modifier = %modifier.spec.name,
                filter_type = %span.filter_type,
                before = current,
                after = span.confidence,
                "confidence modifier applied"
            );
        }

        span.confidence
    }
}

fn apply_action(modifier: &CompiledModifier, current: f64) -> f64 {
    match modifier.spec.action {
        ModifierAction::Override => soft_clamp(modifier.spec.value),
        ModifierAction::Delta => sigmoid_delta(current, modifier.spec.value),
        ModifierAction::Multiply => soft_clamp(current * modifier.spec.value),
    }
}

fn condition_met(
    modifier: &CompiledModifier,
    text: &str,
    span: &Span,
    window_hits: &HashSet<String>,
) -> bool {
    match &modifier.spec.condition {
        ModifierCondition::TextBefore { value, reach } => {
            contains_fold(slice_before(text, span.character_start, *reach), value)
        }
        ModifierCondition::TextAfter { value, reach } => {
            contains_fold(slice_after(text, span.character_end, *reach), value)
        }
        ModifierCondition::TextSurrounding { value, reach } => {
            contains_fold(slice_before(text, span.character_start, *reach), value)
                || contains_fold(slice_after(text, span.character_end, *reach), value)
        }
        ModifierCondition::RegexSurrounding { reach, .. } => {
            let regex = match &modifier.regex {
                Some(r) => r,
                None => return false,
            };
            regex.is_match(slice_before(text, span.character_start, *reach))
                || regex.is_match(slice_after(text, span.character_end, *reach))
        }
        ModifierCondition::WindowKeyword { keywords } => keywords
            .iter()
            .any(|k| window_hits.contains(&k.to_lowercase())),
        ModifierCondition::WindowPattern { .. } => {
            let regex = match &modifier.regex {
                Some(r) => r,
                None => return false,
            };
            span.window.iter().any(|token| regex.is_match(token))
        }
    }
}

fn contains_fold(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn slice_before(text: &str, start: usize, reach: usize) -> &str {
    let end = floor_boundary(text, start);
    let begin = floor_boundary(text, end.saturating_sub(reach));
    &text[begin..end]
}

fn slice_after(text: &str, end: usize, reach: usize) -> &str {
    let begin = ceil_boundary(text, end);
    let stop = ceil_boundary(text, begin.saturating_add(reach));
    &text[begin..stop]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::FilterType;

    fn engine() -> ModifierEngine {
        ModifierEngine::new(ConfidenceConfig::default()).unwrap()
    }

    fn ssn_span(text: &str, confidence: f64) -> Span {
        let start = text.find("123-45-6789").unwrap();
        Span::new(
            FilterType::Ssn,
            start,
            start + "123-45-6789".len(),
            "123-45-6789",
            confidence,
        )
        .with_window(crate::span::tokenize_window(
            text,
            start,
            start + "123-45-6789".len(),
            5,
        ))
    }

    #[tokio::test]
    async fn test_keyword_boost_applies() {
        let engine = engine();
        let text = "Patient SSN is 123-45-6789 on record";
        let mut span = ssn_span(text, 0.6);

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        assert!(adjusted > 0.6, "ssn keyword should boost: {}", adjusted);
        assert!(adjusted < 1.0);
    }

    #[tokio::test]
    async fn test_penalty_applies() {
        let engine = engine();
        let text = "For example an SSN looks like 123-45-6789 here";
        let mut span = ssn_span(text, 0.6);
        // Remove keyword evidence so only the example penalty fires
        span.window = vec!["looks".to_string(), "like".to_string()];

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        assert!(adjusted < 0.6, "example context should penalize: {}", adjusted);
        assert!(adjusted > 0.0);
    }

    #[tokio::test]
    async fn test_confidence_stays_inside_unit_interval() {
        let engine = engine();
        let text = "Patient SSN social security 123-45-6789";
        for initial in [0.0, 0.2, 0.5, 0.8, 1.0] {
            let mut span = ssn_span(text, initial);
            let adjusted = engine.apply_modifiers(text, &mut span).await;
            assert!(adjusted > 0.0 && adjusted < 1.0, "got {}", adjusted);
        }
    }

    #[tokio::test]
    async fn test_ceiling_skips_boosts() {
        let engine = engine();
        let text = "Patient SSN is 123-45-6789";
        let mut span = ssn_span(text, 0.99);

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        // Above the ceiling the ssn boost is skipped; nothing else fires
        assert_eq!(adjusted, 0.99);
    }

    #[tokio::test]
    async fn test_floor_skips_penalties() {
        let engine = engine();
        let text = "For example 123-45-6789 test data";
        let mut span = ssn_span(text, 0.01);
        span.window = vec!["test".to_string()];

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        // Below the floor both penalties are skipped
        assert_eq!(adjusted, 0.01);
    }

    #[tokio::test]
    async fn test_custom_override_modifier() {
        let engine = engine();
        engine
            .add_modifier(ConfidenceModifier {
                name: "force_high".to_string(),
                filter_types: vec![FilterType::Ssn],
                condition: ModifierCondition::TextAfter {
                    value: "confirmed".to_string(),
                    reach: 20,
                },
                action: ModifierAction::Override,
                value: 0.95,
            })
            .await
            .unwrap();

        let text = "number 123-45-6789 confirmed";
        let mut span = ssn_span(text, 0.3);
        span.window.clear();

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        assert!((adjusted - soft_clamp(0.95)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_multiply_action() {
        let registry = ModifierRegistry::new(0.01);
        let engine =
            ModifierEngine::with_registry(ConfidenceConfig::default(), registry);
        engine
            .add_modifier(ConfidenceModifier {
                name: "halve".to_string(),
                filter_types: Vec::new(),
                condition: ModifierCondition::TextBefore {
                    value: "approx".to_string(),
                    reach: 20,
                },
                action: ModifierAction::Multiply,
                value: 0.5,
            })
            .await
            .unwrap();

        let text = "approx 123-45-6789";
        let mut span = ssn_span(text, 0.8);
        let adjusted = engine.apply_modifiers(text, &mut span).await;
        assert!((adjusted - soft_clamp(0.4)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let engine = engine();
        let text = "Patient SSN is 123-45-6789 on record";
        let mut single = ssn_span(text, 0.6);
        let mut batch = vec![ssn_span(text, 0.6)];

        engine.apply_modifiers(text, &mut single).await;
        engine.apply_modifiers_to_all(text, &mut batch).await;

        assert!((single.confidence - batch[0].confidence).abs() < 1e-12);
    }

    #[test]
    fn test_slices_respect_char_boundaries() {
        let text = "héllo wörld 123";
        // Indexes inside multi-byte chars must not panic
        for i in 0..=text.len() {
            let _ = slice_before(text, i, 8);
            let _ = slice_after(text, i, 8);
        }
    }

    #[tokio::test]
    async fn test_window_pattern_condition() {
        let engine = engine();
        let text = "value xxxx 123-45-6789";
        let mut span = ssn_span(text, 0.8);
        span.window = vec!["xxxx".to_string()];

        let adjusted = engine.apply_modifiers(text, &mut span).await;
        // masked_value_penalty multiplies by 0.5
        assert!((adjusted - soft_clamp(0.4)).abs() < 1e-9);
    }
}
