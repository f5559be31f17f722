use crate::config::ScoringConfig;
use crate::models::IndexHit;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub boost: f64,
    pub score: f64,
}

/// Turns a squared distance plus literal term overlap into a score in
/// `[0, 1]`: `min(1, exp(-d) + boost * matched_terms)`.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    exact_match_boost: f64,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl SimilarityScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            exact_match_boost: config.exact_match_boost,
        }
    }

    /// `terms` must already be distinct and lowercased.
    pub fn score(&self, distance: f64, terms: &[String], text: &str) -> ScoreBreakdown {
        let distance = if distance.is_finite() { distance.max(0.0) } else { f64::INFINITY };
        let base = (-distance).exp();

        let lowered = text.to_lowercase();
        let matched = terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .count();
        let boost = self.exact_match_boost * matched as f64;

        ScoreBreakdown {
            base,
            boost,
            score: (base + boost).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub hit: IndexHit,
    pub score: f64,
}

pub fn rank_order(left: &ScoredHit, right: &ScoredHit) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| left.hit.distance.total_cmp(&right.hit.distance))
        .then_with(|| left.hit.ordinal.cmp(&right.hit.ordinal))
}
