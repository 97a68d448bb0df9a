//! rollcall-core — Identity resolution for attendance tracking.
//!
//! Scores a probe embedding against the enrolled gallery, resolves it through
//! a tiered distance/cosine/template policy, and debounces per-frame matches
//! into confirmed recognitions. Embeddings come from a [`FaceBackend`], with
//! SCRFD + ArcFace ONNX implementations provided.

pub mod backend;
pub mod debounce;
pub mod enhance;
pub mod resolver;
pub mod scorer;
pub mod template;
pub mod types;

pub use backend::{BackendError, BackendKind, FaceBackend, FaceObservation, ModelPaths};
pub use debounce::{Confirmation, DebouncePolicy, DebounceRegistry, Debouncer};
pub use resolver::{MatchPolicy, Matcher, TemplateSource, TieredMatcher};
pub use scorer::score_candidates;
pub use template::{FacePatch, PatchTemplates};
pub use types::{
    AttendanceSession, CandidateScore, ConfidenceTier, Embedding, FaceRegion, Identity, MatchDecision,
    MatchReason, Matched, RecognitionEvent,
};
