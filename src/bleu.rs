use std::collections::HashMap;

const MAX_ORDER: usize = 4;
/// Epsilon substituted for zero n-gram matches (NLTK smoothing method 1).
const SMOOTH_EPSILON: f64 = 0.1;

/// Sentence-level BLEU in `[0, 1]`: uniform weights over 1..4-gram modified
/// precisions, brevity penalty, method-1 smoothing so short or partial
/// candidates score low instead of collapsing to zero.
pub fn sentence_bleu(candidate: &[String], reference: &[String]) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }
    let mut log_sum = 0f64;
    for n in 1..=MAX_ORDER {
        let candidate_counts = ngram_counts(candidate, n);
        let reference_counts = ngram_counts(reference, n);
        let matches: usize = candidate_counts
            .iter()
            .map(|(gram, count)| (*count).min(reference_counts.get(gram).copied().unwrap_or(0)))
            .sum();
        let total = candidate.len().saturating_sub(n - 1).max(1);
        let numerator = if matches == 0 {
            SMOOTH_EPSILON
        } else {
            matches as f64
        };
        log_sum += (numerator / total as f64).ln() / MAX_ORDER as f64;
    }
    brevity_penalty(candidate.len(), reference.len()) * log_sum.exp()
}

fn brevity_penalty(candidate_len: usize, reference_len: usize) -> f64 {
    if candidate_len >= reference_len {
        1.0
    } else {
        (1.0 - reference_len as f64 / candidate_len as f64).exp()
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}
