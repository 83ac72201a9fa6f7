//! Two-tier keyword membership testing
//!
//! Batch confidence evaluation needs to know, per span, which registered
//! keywords appear in its context window. A Bloom filter in front of the
//! exact keyword set rejects clearly-absent tokens in O(1) with no false
//! negatives, so the scan costs O(window tokens) instead of
//! O(window tokens x keywords).

use std::collections::HashSet;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Seed separating the two hash streams used for double hashing.
const SECOND_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// A fixed-size Bloom filter over string keys.
///
/// Sized from an expected population and target false-positive rate at
/// construction; never resizes. Collisions can only cause false positives,
/// which the exact backing set behind it filters out.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `expected` keys at `fp_rate`.
    pub fn with_capacity(expected: usize, fp_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let p = fp_rate.clamp(1e-6, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    fn bit_positions(&self, key: &str) -> impl Iterator<Item = u64> + '_ {
        let h1 = xxh3_64_with_seed(key.as_bytes(), 0);
        let h2 = xxh3_64_with_seed(key.as_bytes(), SECOND_HASH_SEED) | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    /// Insert a key.
    pub fn insert(&mut self, key: &str) {
        let positions: Vec<u64> = self.bit_positions(key).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// Membership test; may return false positives, never false negatives.
    pub fn contains(&self, key: &str) -> bool {
        self.bit_positions(key)
            .all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }
}

/// Probabilistic filter plus exact backing set.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    bloom: BloomFilter,
    exact: HashSet<String>,
}

impl KeywordIndex {
    /// Build the index from lowercased keywords.
    pub fn build<I>(keywords: I, fp_rate: f64) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let exact: HashSet<String> = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        let mut bloom = BloomFilter::with_capacity(exact.len(), fp_rate);
        for k in &exact {
            bloom.insert(k);
        }
        Self { bloom, exact }
    }

    /// Two-tier membership test for a single (lowercased) token.
    pub fn contains(&self, token: &str) -> bool {
        self.bloom.contains(token) && self.exact.contains(token)
    }

    /// Collect the registered keywords present in a window, lowercased.
    pub fn hits_in_window(&self, window: &[String]) -> HashSet<String> {
        let mut hits = HashSet::new();
        for token in window {
            let lowered = token.to_lowercase();
            if self.contains(&lowered) {
                hits.insert(lowered);
            }
        }
        hits
    }

    /// Number of indexed keywords.
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// True when no keywords are indexed.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}
