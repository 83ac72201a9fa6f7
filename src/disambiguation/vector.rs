//! Hash-vector context similarity
//!
//! A span's context window is folded into a fixed-length vector by hashing
//! each word into a dimension and L2-normalizing the counts. Past
//! observations are kept per normalized window, bounded per key, and new
//! candidates are scored by average cosine similarity against same-type
//! history.

use crate::span::FilterType;
use std::collections::{HashMap, HashSet, VecDeque};
use xxhash_rust::xxh3::xxh3_64;

/// Squared-magnitude floor below which a vector is treated as degenerate.
const MAGNITUDE_FLOOR: f64 = 1e-10;

/// Pluggable word hash. Defaults to xxh3.
pub type WordHasher = fn(&str) -> u64;

fn default_hasher(word: &str) -> u64 {
    xxh3_64(word.as_bytes())
}

fn stop_words() -> &'static HashSet<&'static str> {
    static STOP_WORDS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    STOP_WORDS.get_or_init(|| {
        HashSet::from([
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in",
            "is", "it", "its", "of", "on", "or", "she", "that", "the", "to", "was", "were",
            "will", "with",
        ])
    })
}

/// Build a normalized context vector from window tokens.
pub fn hash_vector(window: &[String], dims: usize, remove_stop_words: bool) -> Vec<f32> {
    hash_vector_with(window, dims, remove_stop_words, default_hasher)
}

/// Build a normalized context vector with an explicit word hash.
pub fn hash_vector_with(
    window: &[String],
    dims: usize,
    remove_stop_words: bool,
    hasher: WordHasher,
) -> Vec<f32> {
    let dims = dims.max(1);
    let mut vector = vec![0.0f32; dims];

    for token in window {
        let lowered = token.to_lowercase();
        if remove_stop_words && stop_words().contains(lowered.as_str()) {
            continue;
        }
        let dim = (hasher(&lowered) % dims as u64) as usize;
        vector[dim] += 1.0;
    }

    let magnitude_sq: f64 = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum();
    if magnitude_sq > MAGNITUDE_FLOOR {
        let magnitude = magnitude_sq.sqrt() as f32;
        for v in vector.iter_mut() {
            *v /= magnitude;
        }
    }

    vector
}

/// Cosine similarity clamped to [-1, 1].
///
/// Returns 0 when either vector's squared magnitude is below the floor, so
/// degenerate vectors score neutrally instead of dividing by near-zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        mag_a += (*x as f64) * (*x as f64);
        mag_b += (*y as f64) * (*y as f64);
    }

    if mag_a < MAGNITUDE_FLOOR || mag_b < MAGNITUDE_FLOOR {
        return 0.0;
    }

    (dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(-1.0, 1.0)
}

/// One cached (filter type, vector) context observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub filter_type: FilterType,
    pub vector: Vec<f32>,
}

/// Bounded history of context observations keyed by normalized window text.
///
/// Each key holds at most `cap_per_key` observations; the oldest is evicted
/// first.
#[derive(Debug)]
pub struct VectorCache {
    entries: HashMap<String, VecDeque<Observation>>,
    cap_per_key: usize,
}

impl VectorCache {
    /// Create a cache holding up to `cap_per_key` observations per window.
    pub fn new(cap_per_key: usize) -> Self {
        Self {
            entries: HashMap::new(),
            cap_per_key: cap_per_key.max(1),
        }
    }

    /// Record an observation, evicting the oldest when the key is full.
    pub fn observe(&mut self, key: &str, filter_type: FilterType, vector: Vec<f32>) {
        let bucket = self.entries.entry(key.to_string()).or_default();
        if bucket.len() >= self.cap_per_key {
            bucket.pop_front();
        }
        bucket.push_back(Observation {
            filter_type,
            vector,
        });
    }

    /// Average cosine similarity of `vector` against same-type history for
    /// this key. `None` when the key has no observations of that type.
    pub fn avg_similarity(
        &self,
        key: &str,
        filter_type: FilterType,
        vector: &[f32],
    ) -> Option<f64> {
        let bucket = self.entries.get(key)?;
        let same_type: Vec<&Observation> = bucket
            .iter()
            .filter(|o| o.filter_type == filter_type)
            .collect();
        if same_type.is_empty() {
            return None;
        }

        let total: f64 = same_type
            .iter()
            .map(|o| cosine_similarity(&o.vector, vector))
            .sum();
        Some(total / same_type.len() as f64)
    }

    /// Number of distinct window keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Observations held for a key, in insertion order.
    #[cfg(test)]
    pub fn observations(&self, key: &str) -> Option<&VecDeque<Observation>> {
        self.entries.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_hash_vector_normalized() {
        let v = hash_vector(&window(&["patient", "ssn", "number"]), 512, false);
        let magnitude: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hash_vector_empty_window() {
        let v = hash_vector(&[], 512, true);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hash_vector_stop_word_removal() {
        let with_stops = hash_vector(&window(&["the", "ssn", "is"]), 512, true);
        let without = hash_vector(&window(&["ssn"]), 512, true);
        assert_eq!(with_stops, without);
    }

    #[test]
    fn test_cosine_self_is_one() {
        let v = hash_vector(&window(&["patient", "record", "number"]), 512, false);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_is_minus_one() {
        let v = hash_vector(&window(&["alpha", "beta"]), 64, false);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_neutral() {
        let zero = vec![0.0f32; 64];
        let v = hash_vector(&window(&["alpha"]), 64, false);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cache_eviction_oldest_first() {
        let mut cache = VectorCache::new(3);
        for i in 0..5 {
            let mut v = vec![0.0f32; 4];
            v[i % 4] = 1.0;
            cache.observe("key", FilterType::Ssn, v);
        }
        let bucket = cache.observations("key").unwrap();
        assert_eq!(bucket.len(), 3);
        // Oldest (index 0 and 1) evicted; first remaining is i=2
        assert_eq!(bucket[0].vector[2], 1.0);
    }

    #[test]
    fn test_avg_similarity_same_type_only() {
        let mut cache = VectorCache::new(10);
        let ssn_vec = hash_vector(&window(&["social", "security"]), 64, false);
        let phone_vec = hash_vector(&window(&["call", "phone"]), 64, false);

        cache.observe("ctx", FilterType::Ssn, ssn_vec.clone());
        cache.observe("ctx", FilterType::Phone, phone_vec);

        let sim = cache
            .avg_similarity("ctx", FilterType::Ssn, &ssn_vec)
            .unwrap();
        assert!((sim - 1.0).abs() < 1e-6);

        assert!(cache
            .avg_similarity("ctx", FilterType::Mrn, &ssn_vec)
            .is_none());
        assert!(cache
            .avg_similarity("missing", FilterType::Ssn, &ssn_vec)
            .is_none());
    }
}
