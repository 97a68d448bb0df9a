//! Contrast enhancement for hard-to-detect frames.

use image::GrayImage;

/// Contrast-Limited Adaptive Histogram Equalization.
///
/// Splits the image into `tiles × tiles` regions, equalizes each with a
/// clipped histogram, and blends neighbouring tile mappings bilinearly.
/// Images smaller than the tile grid are returned unchanged.
pub fn clahe(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let tiles = tiles.max(1);
    let tile_w = w / tiles;
    let tile_h = h / tiles;
    if tile_w == 0 || tile_h == 0 {
        return gray.clone();
    }

    let t = tiles as usize;
    let mut luts: Vec<[u8; 256]> = Vec::with_capacity(t * t);
    for row in 0..tiles {
        for col in 0..tiles {
            luts.push(tile_lut(gray, col * tile_w, row * tile_h, tile_w, tile_h, clip_limit));
        }
    }

    let mut out = gray.clone();
    let last = (t - 1) as f32;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = pixel.0[0] as usize;

        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
        let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
        let (r0, c0) = (fy as usize, fx as usize);
        let (r1, c1) = ((r0 + 1).min(t - 1), (c0 + 1).min(t - 1));
        let (dy, dx) = (fy - r0 as f32, fx - c0 as f32);

        let at = |r: usize, c: usize| luts[r * t + c][value] as f32;
        let top = at(r0, c0) * (1.0 - dx) + at(r0, c1) * dx;
        let bottom = at(r1, c0) * (1.0 - dx) + at(r1, c1) * dx;

        pixel.0[0] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
    }

    out
}

/// Clipped-histogram equalization mapping for one tile.
fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, tile_w: u32, tile_h: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y0 + tile_h {
        for x in x0..x0 + tile_w {
            hist[gray.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    let pixels = tile_w * tile_h;
    let clip = ((clip_limit * pixels as f32) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let spread = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += spread + u32::from(i < leftover);
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    let mut cdf_min = None;
    let mut cdf = [0u32; 256];
    for (i, &count) in hist.iter().enumerate() {
        cumulative += count;
        cdf[i] = cumulative;
        if cdf_min.is_none() && cumulative > 0 {
            cdf_min = Some(cumulative);
        }
    }
    let cdf_min = cdf_min.unwrap_or(0);
    let denom = cumulative.saturating_sub(cdf_min);
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = if denom > 0 {
            ((cdf[i].saturating_sub(cdf_min)) as f32 / denom as f32 * 255.0).round() as u8
        } else {
            i as u8
        };
    }
    lut
}
