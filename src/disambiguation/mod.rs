//! Disambiguation engine
//!
//! Multiple detectors can claim the exact same character range under
//! different classifications (a 9-digit run may plausibly be an SSN, a
//! phone number, or a record number). Exactly one candidate per range
//! survives. Two interchangeable strategies score candidates — hash-vector
//! similarity against cached context observations, and a static keyword
//! heuristic — plus an optional embedding-based variant that degrades to
//! the hash path when its provider is unavailable. Disambiguation never
//! fails; it degrades to confidence-then-priority ordering.

mod embedding;
mod engine;
mod keyword;
mod vector;

pub use embedding::{EmbeddingProvider, EmbeddingScorer};
pub use engine::DisambiguationEngine;
pub use keyword::{keyword_score, vocabulary};
pub use vector::{cosine_similarity, hash_vector, Observation, VectorCache};
