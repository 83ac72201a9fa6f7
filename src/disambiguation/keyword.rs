//! Keyword-heuristic disambiguation scoring
//!
//! Each filter type carries a static vocabulary of context words. A
//! candidate's score blends normalized vocabulary overlap against its
//! window tokens with its detection confidence. Overlap counts exact
//! substring hits plus fuzzy hits above a similarity threshold, so OCR
//! noise ("patiemt") still lands.

use crate::span::{FilterType, Span};

/// Fuzzy token similarity floor for a vocabulary hit.
const FUZZY_THRESHOLD: f64 = 0.7;

/// Weight on normalized vocabulary overlap; the rest is confidence.
const OVERLAP_WEIGHT: f64 = 0.7;

/// Static context vocabulary for a filter type.
pub fn vocabulary(filter_type: FilterType) -> &'static [&'static str] {
    match filter_type {
        FilterType::Ssn => &["ssn", "social", "security", "taxpayer"],
        FilterType::Mrn => &["mrn", "medical", "record", "chart", "patient"],
        FilterType::CreditCard => &["card", "credit", "visa", "mastercard", "payment"],
        FilterType::Account => &["account", "acct", "balance", "billing"],
        FilterType::License => &["license", "licence", "dl", "permit"],
        FilterType::Passport => &["passport", "travel", "visa"],
        FilterType::HealthPlan => &["plan", "beneficiary", "insurance", "member", "policy"],
        FilterType::Email => &["email", "mail", "contact", "address"],
        FilterType::Phone => &["phone", "tel", "telephone", "call", "cell", "mobile"],
        FilterType::Fax => &["fax", "facsimile"],
        FilterType::Ip => &["ip", "address", "host", "server"],
        FilterType::Url => &["url", "website", "link", "http"],
        FilterType::Date => &["date", "dob", "birth", "admitted", "discharged", "on"],
        FilterType::ZipCode => &["zip", "postal", "code"],
        FilterType::Address => &["address", "street", "city", "state", "residence"],
        FilterType::Age => &["age", "years", "old", "yo"],
        FilterType::Name => &["name", "patient", "mr", "mrs", "ms"],
        FilterType::ProviderName => &["dr", "doctor", "physician", "provider", "attending", "md"],
        FilterType::Vehicle => &["vehicle", "vin", "car", "plate"],
        FilterType::Device => &["device", "serial", "implant", "model"],
        FilterType::Custom => &[],
    }
}

/// Score a candidate: `0.7 * overlap / vocabulary_size + 0.3 * confidence`.
///
/// Empty vocabularies score on confidence alone.
pub fn keyword_score(span: &Span) -> f64 {
    let vocab = vocabulary(span.filter_type);
    if vocab.is_empty() {
        return (1.0 - OVERLAP_WEIGHT) * span.confidence;
    }

    let tokens: Vec<String> = span.window.iter().map(|t| t.to_lowercase()).collect();
    let mut overlap = 0usize;

    for word in vocab {
        let hit = tokens.iter().any(|token| {
            token.contains(word) || token_similarity(token, word) > FUZZY_THRESHOLD
        });
        if hit {
            overlap += 1;
        }
    }

    let normalized = overlap as f64 / vocab.len() as f64;
    OVERLAP_WEIGHT * normalized + (1.0 - OVERLAP_WEIGHT) * span.confidence
}

/// Normalized token similarity: `1 - edit_distance / max_len`.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - damerau_levenshtein(a, b) as f64 / max_len as f64
}

/// Damerau-Levenshtein distance (optimal string alignment).
fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut dist = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dist.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dist[0][j] = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut d = (dist[i - 1][j] + 1)
                .min(dist[i][j - 1] + 1)
                .min(dist[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d = d.min(dist[i - 2][j - 2] + 1);
            }
            dist[i][j] = d;
        }
    }

    dist[n][m]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_with_window(filter_type: FilterType, confidence: f64, window: &[&str]) -> Span {
        Span::new(filter_type, 0, 11, "123-45-6789", confidence)
            .with_window(window.iter().map(|w| w.to_string()).collect())
    }

    #[test]
    fn test_damerau_levenshtein_basics() {
        assert_eq!(damerau_levenshtein("", "abc"), 3);
        assert_eq!(damerau_levenshtein("abc", "abc"), 0);
        assert_eq!(damerau_levenshtein("abc", "abd"), 1);
        // Transposition counts as one edit
        assert_eq!(damerau_levenshtein("patient", "paitent"), 1);
    }

    #[test]
    fn test_token_similarity() {
        assert_eq!(token_similarity("ssn", "ssn"), 1.0);
        assert!(token_similarity("patient", "patiemt") > 0.7);
        assert!(token_similarity("phone", "zebra") < 0.5);
    }

    #[test]
    fn test_ssn_beats_phone_with_ssn_keyword() {
        let ssn = span_with_window(FilterType::Ssn, 0.6, &["patient", "ssn", "is"]);
        let phone = span_with_window(FilterType::Phone, 0.6, &["patient", "ssn", "is"]);

        assert!(keyword_score(&ssn) > keyword_score(&phone));
    }

    #[test]
    fn test_fuzzy_overlap_counts() {
        // "socail" is a fuzzy match for "social"
        let clean = span_with_window(FilterType::Ssn, 0.5, &["social"]);
        let noisy = span_with_window(FilterType::Ssn, 0.5, &["socail"]);
        assert_eq!(keyword_score(&clean), keyword_score(&noisy));
    }

    #[test]
    fn test_no_overlap_scores_confidence_share() {
        let span = span_with_window(FilterType::Ssn, 0.8, &["unrelated", "words"]);
        assert!((keyword_score(&span) - 0.3 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_empty_vocabulary() {
        let span = span_with_window(FilterType::Custom, 0.9, &["anything"]);
        assert!((keyword_score(&span) - 0.3 * 0.9).abs() < 1e-9);
    }
}
