//! Face backend capability: detection and embedding extraction.
//!
//! The rest of the system only sees [`FaceBackend`]. Two implementations
//! share the SCRFD + ArcFace models: [`StandardBackend`] runs them on the raw
//! frame, [`RobustBackend`] retries detection on enhanced and upscaled frames
//! when the raw frame yields nothing.

pub mod alignment;
pub mod detector;
pub mod recognizer;

use crate::enhance;
use crate::template::FacePatch;
use crate::types::{Embedding, FaceRegion};
use detector::{DetectorError, FaceDetector};
use image::imageops::{self, FilterType};
use image::GrayImage;
use recognizer::{FaceRecognizer, RecognizerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Detection and embedding extraction over grayscale frames.
pub trait FaceBackend: Send {
    fn name(&self) -> &'static str;

    /// Detect faces, most confident first. An empty list means no face.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, BackendError>;

    /// Extract the embedding of a face previously returned by [`detect`](Self::detect).
    fn embed(&mut self, frame: &GrayImage, face: &FaceRegion) -> Result<Embedding, BackendError>;
}

/// Which backend implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Standard,
    #[default]
    Robust,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(BackendKind::Standard),
            "robust" => Ok(BackendKind::Robust),
            other => Err(format!("unknown backend '{other}' (expected standard or robust)")),
        }
    }
}

/// Locations of the ONNX models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

/// Probe the model files and construct the configured backend.
pub fn load_backend(kind: BackendKind, models: &ModelPaths) -> Result<Box<dyn FaceBackend>, BackendError> {
    for path in [&models.detector, &models.recognizer] {
        if !path.exists() {
            return Err(BackendError::Unavailable(format!(
                "model {} not found; download it from insightface",
                path.display()
            )));
        }
    }

    let standard = StandardBackend::load(models)?;
    let backend: Box<dyn FaceBackend> = match kind {
        BackendKind::Standard => Box::new(standard),
        BackendKind::Robust => Box::new(RobustBackend::new(standard)),
    };
    tracing::info!(backend = backend.name(), "face backend ready");
    Ok(backend)
}

/// SCRFD detection and ArcFace embedding on the frame as given.
pub struct StandardBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl StandardBackend {
    pub fn load(models: &ModelPaths) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(&models.detector.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&models.recognizer.to_string_lossy())?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceBackend for StandardBackend {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, BackendError> {
        Ok(self.detector.detect(frame)?)
    }

    fn embed(&mut self, frame: &GrayImage, face: &FaceRegion) -> Result<Embedding, BackendError> {
        Ok(self.recognizer.extract(frame, face)?)
    }
}

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 0.02;
const UPSCALE_STEPS: [f32; 3] = [1.25, 1.5, 2.0];

/// Wraps another backend and retries detection on CLAHE-enhanced, then
/// progressively upscaled frames. Regions are always reported in the
/// coordinates of the original frame.
pub struct RobustBackend<B = StandardBackend> {
    inner: B,
}

impl<B: FaceBackend> RobustBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

impl<B: FaceBackend> FaceBackend for RobustBackend<B> {
    fn name(&self) -> &'static str {
        "robust"
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, BackendError> {
        let faces = self.inner.detect(frame)?;
        if !faces.is_empty() {
            return Ok(faces);
        }

        let enhanced = enhance::clahe(frame, CLAHE_TILES, CLAHE_CLIP_LIMIT);
        let faces = self.inner.detect(&enhanced)?;
        if !faces.is_empty() {
            tracing::debug!(count = faces.len(), "faces found after CLAHE");
            return Ok(faces);
        }

        let (w, h) = frame.dimensions();
        for scale in UPSCALE_STEPS {
            let (sw, sh) = ((w as f32 * scale).round() as u32, (h as f32 * scale).round() as u32);
            let upscaled = imageops::resize(frame, sw, sh, FilterType::Triangle);
            let faces = self.inner.detect(&upscaled)?;
            if !faces.is_empty() {
                tracing::debug!(count = faces.len(), scale, "faces found after upscaling");
                return Ok(faces.iter().map(|f| f.scaled(1.0 / scale)).collect());
            }
        }

        Ok(Vec::new())
    }

    fn embed(&mut self, frame: &GrayImage, face: &FaceRegion) -> Result<Embedding, BackendError> {
        self.inner.embed(frame, face)
    }
}

/// One analysed face: where it is, its embedding, and its template patch.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub region: FaceRegion,
    pub embedding: Embedding,
    pub patch: Option<FacePatch>,
}

/// Detect up to `max_faces` faces and extract each one's embedding.
///
/// A face whose embedding fails is logged and skipped; the others still count.
pub fn observe_faces(
    backend: &mut dyn FaceBackend,
    frame: &GrayImage,
    max_faces: usize,
) -> Result<Vec<FaceObservation>, BackendError> {
    let regions = backend.detect(frame)?;
    let mut observations = Vec::with_capacity(regions.len().min(max_faces));

    for region in regions.into_iter().take(max_faces) {
        match backend.embed(frame, &region) {
            Ok(embedding) => observations.push(FaceObservation {
                patch: FacePatch::from_region(frame, &region),
                region,
                embedding,
            }),
            Err(e) => tracing::warn!(error = %e, confidence = region.confidence, "embedding failed, skipping face"),
        }
    }

    Ok(observations)
}
