//! Test doubles shared by the service and spool tests.

use image::GrayImage;
use rollcall_core::{BackendError, Embedding, FaceBackend, FaceRegion};

/// Frames are flat images; the pixel value selects the embedding.
/// Zero means no face.
pub struct Scripted;

impl FaceBackend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, BackendError> {
        if frame.get_pixel(0, 0).0[0] == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![FaceRegion {
            x: 4.0,
            y: 4.0,
            width: 24.0,
            height: 24.0,
            confidence: 0.9,
            landmarks: None,
        }])
    }

    fn embed(&mut self, frame: &GrayImage, _face: &FaceRegion) -> Result<Embedding, BackendError> {
        let values = match frame.get_pixel(0, 0).0[0] {
            10 => vec![1.0, 0.0, 0.0],
            11 => vec![0.99, 0.01, 0.0],
            20 => vec![0.0, 1.0, 0.0],
            _ => vec![0.0, 0.0, 1.0],
        };
        Ok(Embedding::new(values))
    }
}

pub fn frame(value: u8) -> GrayImage {
    GrayImage::from_pixel(32, 32, image::Luma([value]))
}
