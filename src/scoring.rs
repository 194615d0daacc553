//! Similarity scoring between a spoken hypothesis and a reference text
//!
//! These are transcript-level heuristics for the on-device provider; the
//! cloud provider ships its own phoneme-level scores and bypasses this
//! module entirely.

use std::collections::HashSet;

use strsim::levenshtein;

use crate::normalize::normalize;
use crate::types::ScoreSet;

/// Edit-distance accuracy on normalized text, 0-100.
///
/// Both strings empty scores 100; exactly one empty scores 0.
pub fn accuracy(hypothesis: &str, reference: &str) -> f64 {
    let hyp = normalize(hypothesis);
    let refn = normalize(reference);
    if hyp.is_empty() && refn.is_empty() {
        return 100.0;
    }
    if hyp.is_empty() || refn.is_empty() {
        return 0.0;
    }
    let distance = levenshtein(&hyp, &refn) as f64;
    let longest = hyp.chars().count().max(refn.chars().count()) as f64;
    (100.0 * (1.0 - distance / longest)).clamp(0.0, 100.0)
}

/// Share of reference words present anywhere in the hypothesis, 0-100.
///
/// Order-independent; a repeated reference word counts once per
/// occurrence against set membership. An empty reference scores 100.
pub fn completeness(hypothesis: &str, reference: &str) -> f64 {
    let refn = normalize(reference);
    let ref_words: Vec<&str> = refn.split_whitespace().collect();
    if ref_words.is_empty() {
        return 100.0;
    }
    let hyp = normalize(hypothesis);
    let hyp_words: HashSet<&str> = hyp.split_whitespace().collect();
    let hits = ref_words.iter().filter(|w| hyp_words.contains(**w)).count();
    100.0 * hits as f64 / ref_words.len() as f64
}

/// Fluency proxy combining accuracy with pace, 0-100.
///
/// Pace is anchored on normalized transcript length against the reference
/// length, floored at 10 chars to keep short references from blowing up
/// the ratio. `_elapsed_seconds` is part of the signature for callers that
/// sample mid-utterance; the heuristic itself is length-based, not a
/// prosodic measurement.
pub fn fluency(hypothesis: &str, reference: &str, _elapsed_seconds: f64) -> f64 {
    let hyp_len = normalize(hypothesis).chars().count() as f64;
    let ref_len = normalize(reference).chars().count() as f64;
    let pace = (hyp_len / ref_len.max(10.0)).min(1.0);
    (accuracy(hypothesis, reference) * 0.6 + pace * 40.0).clamp(0.0, 100.0)
}

/// Full score set for a hypothesis, with prosody fixed at 0
pub fn score_against(hypothesis: &str, reference: &str, elapsed_seconds: f64) -> ScoreSet {
    ScoreSet {
        accuracy: accuracy(hypothesis, reference),
        fluency: fluency(hypothesis, reference, elapsed_seconds),
        completeness: completeness(hypothesis, reference),
        prosody: 0.0,
    }
}
