//! Redaction pipeline orchestration
//!
//! Wires the hook stages around the decision engines for one document pass:
//!
//! ```text
//! pre_process -> can_short_circuit -> post_detection
//!     -> confidence modifiers -> disambiguation -> pre_redaction
//!     -> writer -> post_redaction
//! ```
//!
//! Span detection itself is an upstream concern; callers supply the raw
//! candidate spans alongside the document. The writer is a trait boundary
//! with a plain mask-token implementation built in.

use crate::config::PhiGuardConfig;
use crate::confidence::ModifierEngine;
use crate::disambiguation::DisambiguationEngine;
use crate::error::Result;
use crate::plugin::{PipelineMetricsExport, PluginManager};
use crate::span::{Document, RedactionResult, Span};
use std::sync::Arc;

/// Turns a finalized span list into redacted text.
pub trait RedactionWriter: Send + Sync {
    /// Produce the redacted form of `text`.
    fn write(&self, text: &str, spans: &[Span]) -> String;
}

/// Replaces each span with a type-tagged mask token, back to front so
/// earlier offsets stay valid.
pub struct MaskWriter;

impl RedactionWriter for MaskWriter {
    fn write(&self, text: &str, spans: &[Span]) -> String {
        let mut out = text.to_string();

        let mut ordered: Vec<&Span> = spans.iter().collect();
        ordered.sort_by(|a, b| b.character_start.cmp(&a.character_start));

        for span in ordered {
            let start = span.character_start.min(out.len());
            let end = span.character_end.min(out.len());
            if end <= start || !out.is_char_boundary(start) || !out.is_char_boundary(end) {
                continue;
            }
            out.replace_range(start..end, &format!("[{}]", span.filter_type.mask_label()));
        }

        out
    }
}

/// One document's pass through detection hooks, the decision engines, and
/// redaction.
pub struct RedactionPipeline {
    manager: Arc<PluginManager>,
    confidence: ModifierEngine,
    disambiguation: DisambiguationEngine,
    writer: Arc<dyn RedactionWriter>,
}

impl RedactionPipeline {
    /// Build a pipeline with the built-in mask writer.
    pub fn new(config: &PhiGuardConfig, manager: Arc<PluginManager>) -> Result<Self> {
        Ok(Self {
            manager,
            confidence: ModifierEngine::new(config.confidence.clone())?,
            disambiguation: DisambiguationEngine::new(config.disambiguation.clone()),
            writer: Arc::new(MaskWriter),
        })
    }

    /// Swap in a custom redaction writer.
    pub fn with_writer(mut self, writer: Arc<dyn RedactionWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Confidence engine handle, for registering extra modifiers.
    pub fn confidence(&self) -> &ModifierEngine {
        &self.confidence
    }

    /// Disambiguation engine handle.
    pub fn disambiguation(&self) -> &DisambiguationEngine {
        &self.disambiguation
    }

    /// Process one document with its upstream-detected candidate spans.
    pub async fn process(&self, doc: Document, spans: Vec<Span>) -> Result<RedactionResult> {
        let started = std::time::Instant::now();

        let doc = self.manager.run_pre_process(doc).await?;

        if let Some((plugin, mut result)) = self.manager.run_short_circuit(&doc).await? {
            result.short_circuited_by = Some(plugin);
            result.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let spans = normalize_spans(spans);
        let mut spans = self.manager.run_post_detection(spans, &doc).await?;

        self.confidence
            .apply_modifiers_to_all(&doc.text, &mut spans)
            .await;

        let spans = self.disambiguation.disambiguate_all(spans).await;
        let spans = self.manager.run_pre_redaction(spans, &doc).await?;

        let redacted_text = self.writer.write(&doc.text, &spans);
        tracing::debug!(
            document = %doc.id,
            spans = spans.len(),
            "document redacted"
        );

        let result = RedactionResult {
            document_id: doc.id,
            redacted_text,
            spans,
            short_circuited_by: None,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.manager.run_post_redaction(result).await
    }

    /// Plugin metrics export.
    pub async fn metrics(&self) -> PipelineMetricsExport {
        self.manager.metrics().await
    }
}

/// Apply the span input contract's defaults: confidence clamped into
/// [0, 1], priority defaulted from the type's specificity when absent.
fn normalize_spans(spans: Vec<Span>) -> Vec<Span> {
    spans
        .into_iter()
        .map(|mut span| {
            span.confidence = span.confidence.clamp(0.0, 1.0);
            if span.priority == 0 {
                span.priority = span.filter_type.specificity();
            }
            span
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HookSet, PluginHooks, PluginRegistry};
    use crate::span::{tokenize_window, FilterType};
    use async_trait::async_trait;

    fn pipeline() -> RedactionPipeline {
        let config = PhiGuardConfig::default();
        let manager = Arc::new(PluginManager::new(
            config.pipeline.clone(),
            PluginRegistry::new(),
        ));
        RedactionPipeline::new(&config, manager).unwrap()
    }

    fn keyword_pipeline() -> RedactionPipeline {
        let mut config = PhiGuardConfig::default();
        config.disambiguation.strategy = crate::config::DisambiguationStrategy::Keyword;
        let manager = Arc::new(PluginManager::new(
            config.pipeline.clone(),
            PluginRegistry::new(),
        ));
        RedactionPipeline::new(&config, manager).unwrap()
    }

    fn detected(text: &str, needle: &str, filter_type: FilterType, confidence: f64) -> Span {
        let start = text.find(needle).unwrap();
        let end = start + needle.len();
        Span::new(filter_type, start, end, needle, confidence)
            .with_window(tokenize_window(text, start, end, 5))
    }

    #[test]
    fn test_mask_writer_replaces_back_to_front() {
        let text = "SSN 123-45-6789 phone 555-867-5309";
        let spans = vec![
            detected(text, "123-45-6789", FilterType::Ssn, 0.9),
            detected(text, "555-867-5309", FilterType::Phone, 0.9),
        ];
        let out = MaskWriter.write(text, &spans);
        assert_eq!(out, "SSN [SSN] phone [PHONE]");
    }

    #[test]
    fn test_mask_writer_skips_invalid_ranges() {
        let text = "short";
        let bogus = Span::new(FilterType::Ssn, 2, 100, "x", 0.9);
        let out = MaskWriter.write(text, &[bogus]);
        assert_eq!(out, "sh[SSN]");
    }

    #[tokio::test]
    async fn test_end_to_end_ambiguous_ssn() {
        let pipeline = keyword_pipeline();
        let text = "The patient ssn is 123-45-6789 on file";
        let doc = Document::new(text);
        let spans = vec![
            detected(text, "123-45-6789", FilterType::Ssn, 0.6),
            detected(text, "123-45-6789", FilterType::Phone, 0.6),
        ];

        let result = pipeline.process(doc, spans).await.unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].filter_type, FilterType::Ssn);
        assert_eq!(result.spans[0].ambiguous_with, vec![FilterType::Phone]);
        assert!(result.redacted_text.contains("[SSN]"));
        assert!(!result.redacted_text.contains("123-45-6789"));
    }

    #[tokio::test]
    async fn test_confidence_modifiers_feed_disambiguation() {
        let pipeline = pipeline();
        let text = "Patient SSN social security 123-45-6789";
        let doc = Document::new(text);
        let spans = vec![detected(text, "123-45-6789", FilterType::Ssn, 0.5)];

        let result = pipeline.process(doc, spans).await.unwrap();
        // Keyword boosts ran before disambiguation
        assert!(result.spans[0].confidence > 0.5);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_engines() {
        struct SkipAll;

        #[async_trait]
        impl PluginHooks for SkipAll {
            async fn can_short_circuit(
                &self,
                doc: &Document,
            ) -> Result<Option<RedactionResult>> {
                Ok(Some(RedactionResult {
                    document_id: doc.id,
                    redacted_text: "(cached)".to_string(),
                    spans: Vec::new(),
                    short_circuited_by: None,
                    duration_ms: 0,
                }))
            }
        }

        let config = PhiGuardConfig::default();
        let manager = Arc::new(PluginManager::new(
            config.pipeline.clone(),
            PluginRegistry::new(),
        ));
        let pipeline = RedactionPipeline::new(&config, manager.clone()).unwrap();
        manager
            .register_builtin("cache", 10, 1000, HookSet::Modern(Arc::new(SkipAll)))
            .await;

        let text = "SSN 123-45-6789";
        let doc = Document::new(text);
        let spans = vec![detected(text, "123-45-6789", FilterType::Ssn, 0.9)];

        let result = pipeline.process(doc, spans).await.unwrap();
        assert_eq!(result.redacted_text, "(cached)");
        assert_eq!(result.short_circuited_by.as_deref(), Some("cache"));
        assert!(result.spans.is_empty());
    }

    #[tokio::test]
    async fn test_pre_redaction_hook_filters_spans() {
        struct DropLowConfidence;

        #[async_trait]
        impl PluginHooks for DropLowConfidence {
            async fn pre_redaction(
                &self,
                spans: Vec<Span>,
                _doc: &Document,
            ) -> Result<Vec<Span>> {
                Ok(spans.into_iter().filter(|s| s.confidence >= 0.5).collect())
            }
        }

        let config = PhiGuardConfig::default();
        let manager = Arc::new(PluginManager::new(
            config.pipeline.clone(),
            PluginRegistry::new(),
        ));
        let pipeline = RedactionPipeline::new(&config, manager.clone()).unwrap();
        manager
            .register_builtin(
                "threshold",
                50,
                1000,
                HookSet::Modern(Arc::new(DropLowConfidence)),
            )
            .await;

        let text = "maybe 123-45-6789 and certainly 999-88-7777";
        let doc = Document::new(text);
        let mut weak = detected(text, "123-45-6789", FilterType::Ssn, 0.1);
        weak.window = vec!["maybe".to_string()];
        let strong = detected(text, "999-88-7777", FilterType::Ssn, 0.95);

        let result = pipeline.process(doc, vec![weak, strong]).await.unwrap();
        assert_eq!(result.spans.len(), 1);
        assert!(result.redacted_text.contains("123-45-6789"));
        assert!(!result.redacted_text.contains("999-88-7777"));
    }

    #[tokio::test]
    async fn test_priority_defaulted_from_specificity() {
        let pipeline = pipeline();
        let text = "id 123-45-6789";
        let doc = Document::new(text);
        let mut span = detected(text, "123-45-6789", FilterType::Ssn, 0.9);
        span.priority = 0;

        let result = pipeline.process(doc, vec![span]).await.unwrap();
        assert_eq!(result.spans[0].priority, FilterType::Ssn.specificity());
    }
}
