//! Temporal debouncing of per-frame matches.
//!
//! A single matching frame is cheap to get by accident, so an identity is
//! only confirmed after several consecutive matching frames, unless the match
//! is strong enough to qualify for immediate acceptance.

use crate::types::{ConfidenceTier, Matched};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Confirmation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebouncePolicy {
    /// Consecutive matching frames required on the debounced path.
    pub min_consecutive_frames: u32,
    /// Matches at or below this distance are confirmed immediately.
    pub immediate_distance: Option<f32>,
    /// Matches at or above this cosine, within the matcher's cosine
    /// distance guard, are confirmed immediately.
    pub immediate_cosine: Option<f32>,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            min_consecutive_frames: 3,
            immediate_distance: None,
            immediate_cosine: None,
        }
    }
}

impl DebouncePolicy {
    fn is_immediate(&self, m: &Matched, cosine_distance_guard: f32) -> bool {
        let by_distance = self.immediate_distance.is_some_and(|t| m.distance <= t);
        let by_cosine = self
            .immediate_cosine
            .is_some_and(|t| m.cosine >= t && m.distance <= cosine_distance_guard);
        by_distance || by_cosine
    }
}

/// A match the debouncer has confirmed for this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub identity_id: String,
    pub tier: ConfidenceTier,
    pub consecutive: u32,
}

/// Consecutive-frame counters for one stream.
#[derive(Debug, Default)]
pub struct Debouncer {
    counts: HashMap<String, u32>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's matches (empty for a frame with no match).
    ///
    /// Matched identities are incremented, every other counter is reset.
    /// `cosine_distance_guard` is the matcher's guard, shared by the immediate
    /// cosine path. Returns the confirmations for this frame, in input order.
    pub fn observe(
        &mut self,
        matches: &[Matched],
        policy: &DebouncePolicy,
        cosine_distance_guard: f32,
    ) -> Vec<Confirmation> {
        let previous = std::mem::take(&mut self.counts);
        let mut confirmations = Vec::new();

        for m in matches {
            if self.counts.contains_key(&m.identity_id) {
                // Same identity twice in one frame counts once.
                continue;
            }
            let count = previous.get(&m.identity_id).copied().unwrap_or(0) + 1;
            self.counts.insert(m.identity_id.clone(), count);

            let tier = if policy.is_immediate(m, cosine_distance_guard) {
                Some(ConfidenceTier::Immediate)
            } else if count >= policy.min_consecutive_frames {
                Some(ConfidenceTier::Debounced)
            } else {
                None
            };

            match tier {
                Some(tier) => confirmations.push(Confirmation {
                    identity_id: m.identity_id.clone(),
                    tier,
                    consecutive: count,
                }),
                None => tracing::trace!(
                    identity = %m.identity_id,
                    count,
                    required = policy.min_consecutive_frames,
                    "match pending confirmation"
                ),
            }
        }

        confirmations
    }

    /// Current consecutive count for `identity_id`.
    pub fn count(&self, identity_id: &str) -> u32 {
        self.counts.get(identity_id).copied().unwrap_or(0)
    }
}

/// Debouncers partitioned by stream, so concurrent cameras never share counters.
#[derive(Debug, Default)]
pub struct DebounceRegistry {
    streams: HashMap<String, Debouncer>,
}

impl DebounceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&mut self, stream: &str) -> &mut Debouncer {
        self.streams.entry(stream.to_string()).or_default()
    }

    pub fn streams(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchReason;

    fn hit(id: &str, distance: f32, cosine: f32) -> Matched {
        Matched {
            identity_id: id.into(),
            reason: MatchReason::Distance,
            confidence: 1.0 - distance,
            distance,
            cosine,
        }
    }

    const GUARD: f32 = 0.9;

    fn policy(frames: u32) -> DebouncePolicy {
        DebouncePolicy {
            min_consecutive_frames: frames,
            immediate_distance: Some(0.35),
            immediate_cosine: Some(0.97),
        }
    }

    #[test]
    fn test_confirms_on_fourth_consecutive_frame() {
        let mut debouncer = Debouncer::new();
        let policy = policy(4);
        let frame = [hit("S1", 0.5, 0.8)];

        for _ in 0..3 {
            assert!(debouncer.observe(&frame, &policy, GUARD).is_empty());
        }
        let confirmed = debouncer.observe(&frame, &policy, GUARD);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].identity_id, "S1");
        assert_eq!(confirmed[0].tier, ConfidenceTier::Debounced);
        assert_eq!(confirmed[0].consecutive, 4);
    }

    #[test]
    fn test_immediate_distance_bypass() {
        let mut debouncer = Debouncer::new();
        let confirmed = debouncer.observe(&[hit("S1", 0.20, 0.5)], &policy(4), GUARD);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].tier, ConfidenceTier::Immediate);
        assert_eq!(confirmed[0].consecutive, 1);
    }

    #[test]
    fn test_immediate_cosine_respects_guard() {
        let mut debouncer = Debouncer::new();
        let policy = policy(4);
        assert!(debouncer.observe(&[hit("S1", 0.95, 0.99)], &policy, GUARD).is_empty());

        let mut debouncer = Debouncer::new();
        let confirmed = debouncer.observe(&[hit("S1", 0.6, 0.98)], &policy, GUARD);
        assert_eq!(confirmed[0].tier, ConfidenceTier::Immediate);
    }

    #[test]
    fn test_immediate_cosine_follows_given_guard() {
        let policy = policy(4);
        let strong_cosine = [hit("S1", 0.9, 0.98)];

        let mut debouncer = Debouncer::new();
        assert!(debouncer.observe(&strong_cosine, &policy, 0.5).is_empty());

        let mut debouncer = Debouncer::new();
        let confirmed = debouncer.observe(&strong_cosine, &policy, 1.10);
        assert_eq!(confirmed[0].tier, ConfidenceTier::Immediate);
    }

    #[test]
    fn test_other_identity_resets_counter() {
        let mut debouncer = Debouncer::new();
        let policy = policy(3);
        debouncer.observe(&[hit("A", 0.5, 0.8)], &policy, GUARD);
        debouncer.observe(&[hit("A", 0.5, 0.8)], &policy, GUARD);
        assert_eq!(debouncer.count("A"), 2);

        debouncer.observe(&[hit("B", 0.5, 0.8)], &policy, GUARD);
        assert_eq!(debouncer.count("A"), 0);
        assert_eq!(debouncer.count("B"), 1);

        assert!(debouncer.observe(&[hit("A", 0.5, 0.8)], &policy, GUARD).is_empty());
    }

    #[test]
    fn test_no_match_frame_resets_counters() {
        let mut debouncer = Debouncer::new();
        let policy = policy(3);
        debouncer.observe(&[hit("A", 0.5, 0.8)], &policy, GUARD);
        debouncer.observe(&[hit("A", 0.5, 0.8)], &policy, GUARD);
        debouncer.observe(&[], &policy, GUARD);
        assert_eq!(debouncer.count("A"), 0);
    }

    #[test]
    fn test_keeps_confirming_after_threshold() {
        let mut debouncer = Debouncer::new();
        let policy = policy(2);
        let frame = [hit("A", 0.5, 0.8)];
        assert!(debouncer.observe(&frame, &policy, GUARD).is_empty());
        assert_eq!(debouncer.observe(&frame, &policy, GUARD).len(), 1);
        assert_eq!(debouncer.observe(&frame, &policy, GUARD).len(), 1);
        assert_eq!(debouncer.count("A"), 3);
    }

    #[test]
    fn test_two_faces_in_one_frame_count_independently() {
        let mut debouncer = Debouncer::new();
        let policy = policy(2);
        let frame = [hit("A", 0.5, 0.8), hit("B", 0.6, 0.7)];
        debouncer.observe(&frame, &policy, GUARD);
        let confirmed = debouncer.observe(&frame, &policy, GUARD);
        let ids: Vec<_> = confirmed.iter().map(|c| c.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_registry_isolates_streams() {
        let mut registry = DebounceRegistry::new();
        let policy = policy(2);
        let frame = [hit("A", 0.5, 0.8)];

        registry.stream("door").observe(&frame, &policy, GUARD);
        assert!(registry.stream("hall").observe(&frame, &policy, GUARD).is_empty());
        assert_eq!(registry.stream("door").observe(&frame, &policy, GUARD).len(), 1);
        assert_eq!(registry.streams(), 2);
    }

    #[test]
    fn test_default_policy_has_no_immediate_path() {
        let mut debouncer = Debouncer::new();
        let policy = DebouncePolicy::default();
        assert!(debouncer.observe(&[hit("A", 0.0, 1.0)], &policy, GUARD).is_empty());
    }
}
