//! Tiered match resolution: distance, then cosine, then template correlation.
//!
//! Every tier requires a margin over the runner-up, so two nearly equally
//! likely identities resolve to [`MatchDecision::NoMatch`] instead of a guess.

use crate::types::{CandidateScore, MatchDecision, MatchReason, Matched};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Thresholds and margins for the resolver tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Distance tier: best distance must be strictly below this.
    pub distance_tolerance: f32,
    /// Distance tier: runner-up must be farther by more than this.
    pub distance_margin: f32,
    /// Cosine tier: best cosine must be at least this.
    pub cosine_threshold: f32,
    /// Cosine tier: best cosine must beat the runner-up by more than this.
    pub cosine_margin: f32,
    /// Cosine tier: the cosine winner's distance must not exceed this.
    pub cosine_distance_guard: f32,
    /// Template tier: correlation must be strictly above this.
    pub template_threshold: f32,
    /// Template tier: how many top cosine candidates are compared.
    pub template_candidates: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            distance_tolerance: 0.90,
            distance_margin: 0.05,
            cosine_threshold: 0.40,
            cosine_margin: 0.05,
            cosine_distance_guard: 1.10,
            template_threshold: 0.75,
            template_candidates: 3,
        }
    }
}

/// Source of appearance-correlation scores for the template tier.
pub trait TemplateSource {
    /// Correlation between the probe face and `identity_id`'s reference face,
    /// or `None` when that identity has no usable reference image.
    fn correlate(&self, identity_id: &str) -> Option<f32>;
}

/// Strategy for turning candidate scores into at most one identity.
pub trait Matcher {
    /// Resolve `scores` into a decision. Template scores computed along the
    /// way are written back into the matching [`CandidateScore`].
    fn resolve(
        &self,
        scores: &mut [CandidateScore],
        templates: Option<&dyn TemplateSource>,
    ) -> MatchDecision;
}

/// The distance → cosine → template matcher.
#[derive(Debug, Clone, Default)]
pub struct TieredMatcher {
    pub policy: MatchPolicy,
}

impl TieredMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    fn distance_tier(&self, scores: &[CandidateScore], by_distance: &[usize]) -> Option<Matched> {
        let best = &scores[*by_distance.first()?];
        if best.euclidean_distance >= self.policy.distance_tolerance {
            return None;
        }
        if let Some(&second_idx) = by_distance.get(1) {
            let gap = scores[second_idx].euclidean_distance - best.euclidean_distance;
            if gap <= self.policy.distance_margin {
                tracing::debug!(
                    best = %best.identity_id,
                    runner_up = %scores[second_idx].identity_id,
                    gap,
                    "distance tier ambiguous"
                );
                return None;
            }
        }
        Some(matched(best, MatchReason::Distance, 1.0 - best.euclidean_distance))
    }

    fn cosine_tier(&self, scores: &[CandidateScore], by_cosine: &[usize]) -> Option<Matched> {
        let best = &scores[*by_cosine.first()?];
        if best.cosine_similarity < self.policy.cosine_threshold {
            return None;
        }
        if best.euclidean_distance > self.policy.cosine_distance_guard {
            tracing::debug!(
                best = %best.identity_id,
                distance = best.euclidean_distance,
                guard = self.policy.cosine_distance_guard,
                "cosine tier rejected by distance guard"
            );
            return None;
        }
        if let Some(&second_idx) = by_cosine.get(1) {
            let gap = best.cosine_similarity - scores[second_idx].cosine_similarity;
            if gap <= self.policy.cosine_margin {
                tracing::debug!(
                    best = %best.identity_id,
                    runner_up = %scores[second_idx].identity_id,
                    gap,
                    "cosine tier ambiguous"
                );
                return None;
            }
        }
        Some(matched(best, MatchReason::Cosine, best.cosine_similarity))
    }

    fn template_tier(
        &self,
        scores: &mut [CandidateScore],
        by_cosine: &[usize],
        templates: &dyn TemplateSource,
    ) -> Option<Matched> {
        for &idx in by_cosine.iter().take(self.policy.template_candidates) {
            let Some(correlation) = templates.correlate(&scores[idx].identity_id) else {
                continue;
            };
            scores[idx].template_score = Some(correlation);
            if correlation > self.policy.template_threshold {
                return Some(matched(&scores[idx], MatchReason::Template, correlation));
            }
        }
        None
    }
}

impl Matcher for TieredMatcher {
    fn resolve(
        &self,
        scores: &mut [CandidateScore],
        templates: Option<&dyn TemplateSource>,
    ) -> MatchDecision {
        if scores.is_empty() {
            return MatchDecision::NoMatch;
        }

        let by_distance = ranked(scores, |a, b| {
            a.euclidean_distance.partial_cmp(&b.euclidean_distance)
        });
        if let Some(m) = self.distance_tier(scores, &by_distance) {
            return MatchDecision::Matched(m);
        }

        let by_cosine = ranked(scores, |a, b| {
            b.cosine_similarity.partial_cmp(&a.cosine_similarity)
        });
        if let Some(m) = self.cosine_tier(scores, &by_cosine) {
            return MatchDecision::Matched(m);
        }

        if let Some(templates) = templates {
            if let Some(m) = self.template_tier(scores, &by_cosine, templates) {
                return MatchDecision::Matched(m);
            }
        }

        MatchDecision::NoMatch
    }
}

/// Indices of `scores` ordered by `cmp`; incomparable values (NaN) keep their order.
fn ranked<F>(scores: &[CandidateScore], cmp: F) -> Vec<usize>
where
    F: Fn(&CandidateScore, &CandidateScore) -> Option<Ordering>,
{
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| cmp(&scores[a], &scores[b]).unwrap_or(Ordering::Equal));
    order
}

fn matched(score: &CandidateScore, reason: MatchReason, confidence: f32) -> Matched {
    Matched {
        identity_id: score.identity_id.clone(),
        reason,
        confidence,
        distance: score.euclidean_distance,
        cosine: score.cosine_similarity,
    }
}
