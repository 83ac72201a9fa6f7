//! Embedding-based disambiguation scoring
//!
//! Optional variant that replaces the hash vector with a learned sentence
//! embedding and compares it against a per-filter-type prototype embedding.
//! The provider is an external capability with unspecified availability;
//! every failure degrades to the hash-vector path in the same call, so this
//! module never makes disambiguation fail.

use crate::disambiguation::vector::cosine_similarity;
use crate::error::Result;
use crate::span::{FilterType, Span};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Weight on embedding similarity; the rest is confidence.
const SIMILARITY_WEIGHT: f64 = 0.7;

/// External sentence-embedding capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a piece of text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Prototype sentence describing each filter type's typical context.
fn prototype_sentence(filter_type: FilterType) -> &'static str {
    match filter_type {
        FilterType::Ssn => "patient social security number ssn",
        FilterType::Mrn => "medical record number chart mrn",
        FilterType::CreditCard => "credit card payment number",
        FilterType::Account => "account number billing balance",
        FilterType::License => "driver license permit number",
        FilterType::Passport => "passport travel document number",
        FilterType::HealthPlan => "health plan beneficiary insurance member",
        FilterType::Email => "email address contact",
        FilterType::Phone => "telephone phone call number",
        FilterType::Fax => "fax facsimile number",
        FilterType::Ip => "ip address network host",
        FilterType::Url => "website url link",
        FilterType::Date => "date of birth admission discharge",
        FilterType::ZipCode => "zip postal code",
        FilterType::Address => "street address city state residence",
        FilterType::Age => "patient age years old",
        FilterType::Name => "patient person name",
        FilterType::ProviderName => "doctor physician provider name",
        FilterType::Vehicle => "vehicle identification number plate",
        FilterType::Device => "device serial implant identifier",
        FilterType::Custom => "sensitive identifier",
    }
}

/// Scores spans against per-type prototype embeddings.
///
/// Prototype embeddings are computed lazily on first use and cached for the
/// scorer's lifetime.
pub struct EmbeddingScorer {
    provider: Arc<dyn EmbeddingProvider>,
    prototypes: RwLock<HashMap<FilterType, Vec<f32>>>,
}

impl EmbeddingScorer {
    /// Create a scorer over an embedding provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            prototypes: RwLock::new(HashMap::new()),
        }
    }

    /// Score a candidate: `0.7 * similarity + 0.3 * confidence`.
    ///
    /// Returns `None` when the provider fails; the caller falls back to the
    /// hash-vector path.
    pub async fn score(&self, span: &Span) -> Option<f64> {
        let window_text = span.window.join(" ");
        let embedded = self.provider.embed(&window_text).await.ok()?;
        let prototype = self.prototype_for(span.filter_type).await?;

        let similarity = cosine_similarity(&embedded, &prototype);
        Some(SIMILARITY_WEIGHT * similarity + (1.0 - SIMILARITY_WEIGHT) * span.confidence)
    }

    async fn prototype_for(&self, filter_type: FilterType) -> Option<Vec<f32>> {
        if let Some(existing) = self.prototypes.read().await.get(&filter_type) {
            return Some(existing.clone());
        }

        let embedded = self
            .provider
            .embed(prototype_sentence(filter_type))
            .await
            .ok()?;
        self.prototypes
            .write()
            .await
            .insert(filter_type, embedded.clone());
        Some(embedded)
    }
}
