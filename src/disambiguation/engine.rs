//! Disambiguation engine: same-range resolution plus overlap cleanup

use crate::config::{DisambiguationConfig, DisambiguationStrategy};
use crate::disambiguation::embedding::EmbeddingScorer;
use crate::disambiguation::keyword::keyword_score;
use crate::disambiguation::vector::{hash_vector, VectorCache};
use crate::span::{normalize_window, Span};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Weight on history similarity in the vector strategy; the rest is
/// confidence.
const SIMILARITY_WEIGHT: f64 = 0.6;

/// Resolves competing span classifications.
///
/// Spans are partitioned by exact character range; ranges with more than
/// one member are ambiguous and exactly one candidate survives. Every
/// observed span (winner or not) is recorded in the vector cache for future
/// lookups regardless of the active strategy.
pub struct DisambiguationEngine {
    config: DisambiguationConfig,
    cache: RwLock<VectorCache>,
    embedding: Option<EmbeddingScorer>,
}

impl DisambiguationEngine {
    /// Create an engine with the configured strategy and an empty cache.
    pub fn new(config: DisambiguationConfig) -> Self {
        let cache = VectorCache::new(config.cache_per_key);
        Self {
            config,
            cache: RwLock::new(cache),
            embedding: None,
        }
    }

    /// Attach an embedding scorer for the embedding strategy.
    pub fn with_embedding_provider(
        mut self,
        provider: Arc<dyn crate::disambiguation::EmbeddingProvider>,
    ) -> Self {
        self.embedding = Some(EmbeddingScorer::new(provider));
        self
    }

    /// Resolve all ambiguous ranges in a span list.
    ///
    /// Deterministic for a fixed cache state and input order, and
    /// idempotent: re-running on the output changes nothing.
    pub async fn disambiguate_all(&self, spans: Vec<Span>) -> Vec<Span> {
        let mut groups: BTreeMap<(usize, usize), Vec<Span>> = BTreeMap::new();
        for span in spans {
            groups
                .entry((span.character_start, span.character_end))
                .or_default()
                .push(span);
        }

        let mut survivors = Vec::with_capacity(groups.len());
        for (_, group) in groups {
            let winner = self.resolve_group(group).await;
            survivors.push(winner);
        }

        resolve_overlaps(survivors)
    }

    async fn resolve_group(&self, mut group: Vec<Span>) -> Span {
        if group.len() == 1 {
            let span = group.remove(0);
            self.observe(&span).await;
            return span;
        }

        let scores = self.score_group(&group).await;
        for span in &group {
            self.observe(span).await;
        }

        // Winner: best score, ties broken by confidence then priority.
        let mut winner_idx = 0usize;
        for i in 1..group.len() {
            if better_candidate(
                (scores[i], group[i].confidence, group[i].priority),
                (
                    scores[winner_idx],
                    group[winner_idx].confidence,
                    group[winner_idx].priority,
                ),
            ) {
                winner_idx = i;
            }
        }

        let losers: Vec<_> = group
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner_idx)
            .map(|(_, s)| s.filter_type)
            .collect();

        let mut winner = group.swap_remove(winner_idx);
        winner.disambiguation_score = Some(scores[winner_idx]);
        winner.ambiguous_with = losers;

        tracing::debug!(
            winner = %winner.filter_type,
            score = scores[winner_idx],
            rejected = winner.ambiguous_with.len(),
            start = winner.character_start,
            end = winner.character_end,
            "ambiguous range resolved"
        );

        winner
    }

    async fn score_group(&self, group: &[Span]) -> Vec<f64> {
        match self.config.strategy {
            DisambiguationStrategy::Vector => self.vector_scores(group).await,
            DisambiguationStrategy::Keyword => self.keyword_scores(group),
            DisambiguationStrategy::Embedding => {
                if let Some(scores) = self.embedding_scores(group).await {
                    scores
                } else {
                    self.vector_scores(group).await
                }
            }
        }
    }

    async fn vector_scores(&self, group: &[Span]) -> Vec<f64> {
        let cache = self.cache.read().await;
        group
            .iter()
            .map(|span| {
                let key = normalize_window(&span.window);
                let vector = hash_vector(
                    &span.window,
                    self.config.vector_dims,
                    self.config.remove_stop_words,
                );
                match cache.avg_similarity(&key, span.filter_type, &vector) {
                    Some(similarity) => {
                        SIMILARITY_WEIGHT * similarity
                            + (1.0 - SIMILARITY_WEIGHT) * span.confidence
                    }
                    None => span.confidence,
                }
            })
            .collect()
    }

    fn keyword_scores(&self, group: &[Span]) -> Vec<f64> {
        let scores: Vec<f64> = group.iter().map(keyword_score).collect();
        let best = scores.iter().cloned().fold(f64::MIN, f64::max);

        if best < self.config.keyword_threshold {
            // No meaningful keyword evidence: fall back to ordering by
            // confidence then declared priority.
            return group
                .iter()
                .map(|s| s.confidence + s.priority as f64 / 1e6)
                .collect();
        }

        scores
    }

    async fn embedding_scores(&self, group: &[Span]) -> Option<Vec<f64>> {
        let scorer = self.embedding.as_ref()?;
        let mut scores = Vec::with_capacity(group.len());
        for span in group {
            scores.push(scorer.score(span).await?);
        }
        Some(scores)
    }

    async fn observe(&self, span: &Span) {
        let key = normalize_window(&span.window);
        let vector = hash_vector(
            &span.window,
            self.config.vector_dims,
            self.config.remove_stop_words,
        );
        self.cache
            .write()
            .await
            .observe(&key, span.filter_type, vector);
    }

    /// Number of distinct window keys currently cached.
    pub async fn cache_size(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn better_candidate(a: (f64, f64, u32), b: (f64, f64, u32)) -> bool {
    const TOLERANCE: f64 = 1e-9;
    if (a.0 - b.0).abs() > TOLERANCE {
        return a.0 > b.0;
    }
    if (a.1 - b.1).abs() > TOLERANCE {
        return a.1 > b.1;
    }
    a.2 > b.2
}

/// Composite ordering score for the overlap pass.
fn overlap_score(span: &Span) -> f64 {
    let length_score = (span.len() as f64 / 50.0).min(1.0) * 40.0;
    let confidence_score = span.confidence * 30.0;
    let type_score = (span.filter_type.specificity() as f64 / 100.0).min(1.0) * 20.0;
    let priority_score = (span.priority as f64 / 100.0).min(1.0) * 10.0;
    length_score + confidence_score + type_score + priority_score
}

/// Drop spans that overlap a better-scoring survivor.
///
/// Containment is special-cased: a contained span with strictly higher
/// type specificity and confidence at or above 0.9 replaces its container;
/// a container only displaces a contained span when its own specificity is
/// strictly higher.
fn resolve_overlaps(spans: Vec<Span>) -> Vec<Span> {
    if spans.len() <= 1 {
        return spans;
    }

    let mut ordered = spans;
    ordered.sort_by(|a, b| {
        let (sa, sb) = (overlap_score(a), overlap_score(b));
        if (sa - sb).abs() > 0.001 {
            return sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal);
        }
        if a.character_start != b.character_start {
            return a.character_start.cmp(&b.character_start);
        }
        b.len().cmp(&a.len())
    });

    let mut kept: Vec<Span> = Vec::new();
    'candidates: for candidate in ordered {
        let mut replace_idx = None;

        for (i, existing) in kept.iter().enumerate() {
            if !candidate.overlaps(existing) {
                continue;
            }

            if candidate.contains(existing) {
                if candidate.filter_type.specificity() <= existing.filter_type.specificity() {
                    continue 'candidates;
                }
            } else if existing.contains(&candidate) {
                if candidate.filter_type.specificity() > existing.filter_type.specificity()
                    && candidate.confidence >= 0.9
                {
                    replace_idx = Some(i);
                    break;
                }
                continue 'candidates;
            } else {
                continue 'candidates;
            }
        }

        if let Some(i) = replace_idx {
            kept[i] = candidate;
        } else {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|s| s.character_start);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::FilterType;

    fn candidate(
        filter_type: FilterType,
        start: usize,
        end: usize,
        confidence: f64,
        window: &[&str],
    ) -> Span {
        Span::new(filter_type, start, end, "123-45-6789", confidence)
            .with_window(window.iter().map(|w| w.to_string()).collect())
    }

    fn keyword_engine() -> DisambiguationEngine {
        DisambiguationEngine::new(DisambiguationConfig {
            strategy: DisambiguationStrategy::Keyword,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_keyword_ssn_beats_phone() {
        let engine = keyword_engine();
        let window = ["patient", "ssn", "is"];
        let spans = vec![
            candidate(FilterType::Ssn, 10, 21, 0.6, &window),
            candidate(FilterType::Phone, 10, 21, 0.6, &window),
        ];

        let resolved = engine.disambiguate_all(spans).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filter_type, FilterType::Ssn);
        assert_eq!(resolved[0].ambiguous_with, vec![FilterType::Phone]);
        assert!(resolved[0].disambiguation_score.is_some());
    }

    #[tokio::test]
    async fn test_keyword_fallback_below_threshold() {
        let engine = keyword_engine();
        // No vocabulary evidence in the window: scores fall below the
        // threshold and ordering falls back to confidence then priority.
        let window = ["lorem", "ipsum"];
        let spans = vec![
            candidate(FilterType::Phone, 10, 21, 0.10, &window),
            candidate(FilterType::Ssn, 10, 21, 0.12, &window),
        ];

        let resolved = engine.disambiguate_all(spans).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filter_type, FilterType::Ssn);
    }

    #[tokio::test]
    async fn test_vector_no_history_uses_confidence() {
        let engine = DisambiguationEngine::new(DisambiguationConfig::default());
        let window = ["patient", "context"];
        let spans = vec![
            candidate(FilterType::Ssn, 10, 21, 0.5, &window),
            candidate(FilterType::Phone, 10, 21, 0.8, &window),
        ];

        let resolved = engine.disambiguate_all(spans).await;
        assert_eq!(resolved[0].filter_type, FilterType::Phone);
        assert!((resolved[0].disambiguation_score.unwrap() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_vector_history_shifts_winner() {
        let engine = DisambiguationEngine::new(DisambiguationConfig::default());
        let window = ["patient", "ssn", "number"];

        // Seed history: this window has repeatedly resolved to SSN.
        for _ in 0..5 {
            engine
                .disambiguate_all(vec![candidate(FilterType::Ssn, 0, 11, 0.9, &window)])
                .await;
        }

        let spans = vec![
            candidate(FilterType::Ssn, 30, 41, 0.5, &window),
            candidate(FilterType::Phone, 30, 41, 0.6, &window),
        ];
        let resolved = engine.disambiguate_all(spans).await;

        // SSN: 0.6 * 1.0 + 0.4 * 0.5 = 0.8 beats phone's raw 0.6
        assert_eq!(resolved[0].filter_type, FilterType::Ssn);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let engine = keyword_engine();
        let window = ["patient", "ssn", "is"];
        let spans = vec![
            candidate(FilterType::Ssn, 10, 21, 0.6, &window),
            candidate(FilterType::Phone, 10, 21, 0.6, &window),
            candidate(FilterType::Date, 40, 50, 0.7, &["on"]),
        ];

        let first = engine.disambiguate_all(spans).await;
        let second = engine.disambiguate_all(first.clone()).await;

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.filter_type, b.filter_type);
            assert!(a.same_range(b));
        }
    }

    #[tokio::test]
    async fn test_all_observations_cached() {
        let engine = keyword_engine();
        let spans = vec![
            candidate(FilterType::Ssn, 10, 21, 0.6, &["patient", "ssn"]),
            candidate(FilterType::Phone, 10, 21, 0.6, &["patient", "ssn"]),
            candidate(FilterType::Date, 40, 50, 0.7, &["admitted", "on"]),
        ];

        engine.disambiguate_all(spans).await;
        // Two distinct windows cached, losers included.
        assert_eq!(engine.cache_size().await, 2);
    }

    #[tokio::test]
    async fn test_overlap_partial_drops_lower_score() {
        let engine = keyword_engine();
        let mut long = candidate(FilterType::Name, 0, 40, 0.9, &["patient"]);
        long.text = "x".repeat(40);
        let short = candidate(FilterType::Date, 35, 45, 0.5, &["on"]);

        let resolved = engine.disambiguate_all(vec![long, short]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filter_type, FilterType::Name);
    }

    #[tokio::test]
    async fn test_contained_high_specificity_replaces_container() {
        let engine = keyword_engine();
        let mut container = candidate(FilterType::Name, 0, 40, 0.95, &["patient"]);
        container.text = "x".repeat(40);
        let contained = candidate(FilterType::Ssn, 10, 21, 0.95, &["ssn"]);

        let resolved = engine.disambiguate_all(vec![container, contained]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filter_type, FilterType::Ssn);
    }

    #[tokio::test]
    async fn test_contained_low_confidence_loses_to_container() {
        let engine = keyword_engine();
        let mut container = candidate(FilterType::Name, 0, 40, 0.95, &["patient"]);
        container.text = "x".repeat(40);
        let contained = candidate(FilterType::Ssn, 10, 21, 0.5, &["ssn"]);

        let resolved = engine.disambiguate_all(vec![container, contained]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].filter_type, FilterType::Name);
    }

    #[tokio::test]
    async fn test_embedding_falls_back_without_provider() {
        let engine = DisambiguationEngine::new(DisambiguationConfig {
            strategy: DisambiguationStrategy::Embedding,
            ..Default::default()
        });
        let spans = vec![
            candidate(FilterType::Ssn, 10, 21, 0.5, &["ctx"]),
            candidate(FilterType::Phone, 10, 21, 0.8, &["ctx"]),
        ];

        // No provider attached: hash-vector path decides.
        let resolved = engine.disambiguate_all(spans).await;
        assert_eq!(resolved[0].filter_type, FilterType::Phone);
    }
}
