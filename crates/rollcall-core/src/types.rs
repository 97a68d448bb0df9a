use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    /// Scale every coordinate by `factor` (used to map detections between image scales).
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
        }
    }
}

/// Guard added to the cosine denominator so zero vectors never divide by zero.
pub const COSINE_EPSILON: f32 = 1e-9;

/// Face embedding vector (512-dimensional for ArcFace, 128 for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]: `dot / (|a|·|b| + ε)`. Higher = more similar.
    ///
    /// Callers must check that both embeddings have the same dimensionality.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled identity and its reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub embeddings: Vec<Embedding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<DateTime<Local>>,
}

impl Identity {
    /// The first enrolled embedding; the only one used for scoring.
    pub fn canonical_embedding(&self) -> Option<&Embedding> {
        self.embeddings.first()
    }
}

/// Per-candidate metrics produced by the scorer for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub identity_id: String,
    pub euclidean_distance: f32,
    pub cosine_similarity: f32,
    pub template_score: Option<f32>,
}

/// Which resolver tier accepted a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    Distance,
    Cosine,
    Template,
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MatchReason::Distance => "distance",
            MatchReason::Cosine => "cosine",
            MatchReason::Template => "template",
        })
    }
}

/// A single accepted candidate for one face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub identity_id: String,
    pub reason: MatchReason,
    /// Tier-specific confidence: `1 - distance`, the cosine, or the correlation.
    pub confidence: f32,
    pub distance: f32,
    pub cosine: f32,
}

/// Outcome of resolving one probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    NoMatch,
    Matched(Matched),
}

impl MatchDecision {
    pub fn matched(&self) -> Option<&Matched> {
        match self {
            MatchDecision::Matched(m) => Some(m),
            MatchDecision::NoMatch => None,
        }
    }
}

/// How a recognition was confirmed by the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Immediate,
    Debounced,
}

/// A confirmed recognition, ready to be applied to the attendance sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub identity_id: String,
    pub display_name: String,
    pub confirmed_at: DateTime<Local>,
    pub tier: ConfidenceTier,
}

/// One attendance record per identity per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub identity_id: String,
    pub display_name: String,
    pub date: NaiveDate,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    pub duration_hours: f64,
}

impl AttendanceSession {
    /// Open a session at the first appearance of the day.
    pub fn open(identity_id: &str, display_name: &str, at: DateTime<Local>) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            date: at.date_naive(),
            first_seen: at,
            last_seen: at,
            duration_hours: 0.0,
        }
    }

    /// Move `last_seen` forward to `at` and recompute the duration.
    /// Earlier timestamps are ignored so `last_seen` never goes backwards.
    pub fn extend_to(&mut self, at: DateTime<Local>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
        self.duration_hours = duration_hours(self.first_seen, self.last_seen);
    }
}

/// Hours between two instants, rounded to two decimals, never negative.
pub fn duration_hours(from: DateTime<Local>, to: DateTime<Local>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0) as f64;
    round2(millis / 3_600_000.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
