//! Appearance correlation between face crops, used by the template tier.
//!
//! Faces are cropped from grayscale frames, resized to a fixed square patch,
//! and compared with zero-mean normalized cross-correlation.

use crate::resolver::TemplateSource;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::collections::HashMap;

/// Side length of a normalized face patch.
pub const PATCH_SIZE: u32 = 64;

/// A face crop normalized to `PATCH_SIZE × PATCH_SIZE`.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePatch {
    pixels: Vec<u8>,
}

impl FacePatch {
    /// Crop `region` out of `frame` (clamped to the frame) and resize it.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn from_region(frame: &GrayImage, region: &FaceRegion) -> Option<Self> {
        let (w, h) = frame.dimensions();
        let x0 = region.x.max(0.0).floor() as u32;
        let y0 = region.y.max(0.0).floor() as u32;
        let x1 = ((region.x + region.width).ceil().max(0.0) as u32).min(w);
        let y1 = ((region.y + region.height).ceil().max(0.0) as u32).min(h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        let crop = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
        let resized = imageops::resize(&crop, PATCH_SIZE, PATCH_SIZE, FilterType::Triangle);
        Some(Self {
            pixels: resized.into_raw(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Pearson correlation of two patches in [-1, 1]. Flat patches correlate to 0.
pub fn correlate(a: &FacePatch, b: &FacePatch) -> f32 {
    let n = a.pixels.len().min(b.pixels.len());
    if n == 0 {
        return 0.0;
    }

    let mean = |p: &[u8]| p[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_a = mean(&a.pixels);
    let mean_b = mean(&b.pixels);

    let mut cov = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&pa, &pb) in a.pixels[..n].iter().zip(&b.pixels[..n]) {
        let da = pa as f64 - mean_a;
        let db = pb as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        (cov / denom) as f32
    } else {
        0.0
    }
}

/// Template source backed by one probe patch and the gallery's reference patches.
pub struct PatchTemplates<'a> {
    pub probe: &'a FacePatch,
    pub references: &'a HashMap<String, FacePatch>,
}

impl TemplateSource for PatchTemplates<'_> {
    fn correlate(&self, identity_id: &str) -> Option<f32> {
        self.references
            .get(identity_id)
            .map(|reference| correlate(self.probe, reference))
    }
}
