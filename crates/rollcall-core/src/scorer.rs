//! Candidate scoring: distance and cosine metrics of one probe against every
//! enrolled identity.

use crate::types::{CandidateScore, Embedding, Identity};

/// Score `probe` against each identity's canonical embedding.
///
/// Identities without an embedding, or whose canonical embedding has a
/// different dimensionality than the probe, are skipped and logged. One bad
/// reference never aborts the pass.
pub fn score_candidates(probe: &Embedding, gallery: &[Identity]) -> Vec<CandidateScore> {
    let mut scores = Vec::with_capacity(gallery.len());

    for identity in gallery {
        let Some(reference) = identity.canonical_embedding() else {
            tracing::debug!(identity = %identity.id, "identity has no reference embedding");
            continue;
        };

        if reference.dims() != probe.dims() || probe.dims() == 0 {
            tracing::warn!(
                identity = %identity.id,
                probe_dims = probe.dims(),
                reference_dims = reference.dims(),
                "dimension mismatch, skipping candidate"
            );
            continue;
        }

        scores.push(CandidateScore {
            identity_id: identity.id.clone(),
            euclidean_distance: probe.euclidean_distance(reference),
            cosine_similarity: probe.cosine_similarity(reference),
            template_score: None,
        });
    }

    scores
}
