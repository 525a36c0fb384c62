//! Hue/saturation histogram encoder.
//!
//! A face crop is resized to 128x128, converted to HSV on the 8-bit OpenCV
//! scale (H in 0..180, S in 0..256) and binned into a 30x32 histogram,
//! min-max normalized to [0, 1]. Two encodings are compared by correlation.

use crate::types::{Encoding, FaceBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

const CROP_SIZE: u32 = 128;
pub const HUE_BINS: usize = 30;
pub const SAT_BINS: usize = 32;
pub const ENCODING_LEN: usize = HUE_BINS * SAT_BINS;
const HUE_RANGE: f32 = 180.0;
const SAT_RANGE: f32 = 256.0;

#[derive(Error, Debug, PartialEq)]
pub enum EncodeError {
    #[error("face region {0:?} is empty after clipping to the {1}x{2} image")]
    EmptyRegion(FaceBox, u32, u32),
}

/// Compute the histogram encoding of `face` within `image`.
pub fn encode_face(image: &RgbImage, face: &FaceBox) -> Result<Encoding, EncodeError> {
    let (width, height) = image.dimensions();
    let region = face.clamp_to(width, height);
    if region.width() <= 0 || region.height() <= 0 {
        return Err(EncodeError::EmptyRegion(*face, width, height));
    }

    let crop = imageops::crop_imm(
        image,
        region.left as u32,
        region.top as u32,
        region.width() as u32,
        region.height() as u32,
    )
    .to_image();
    let resized = imageops::resize(&crop, CROP_SIZE, CROP_SIZE, FilterType::Triangle);

    let mut hist = vec![0.0f32; ENCODING_LEN];
    for pixel in resized.pixels() {
        let [r, g, b] = pixel.0;
        let (h_bin, s_bin) = hs_bins(r, g, b);
        hist[h_bin * SAT_BINS + s_bin] += 1.0;
    }

    normalize_min_max(&mut hist);
    Ok(Encoding(hist))
}

/// Histogram bins of one pixel. H and S are rounded to their 8-bit values
/// first, the way an 8-bit HSV image stores them.
fn hs_bins(r: u8, g: u8, b: u8) -> (usize, usize) {
    let (h, s, _) = rgb_to_hsv(r, g, b);
    let h = h.round().clamp(0.0, HUE_RANGE - 1.0);
    let s = s.round().clamp(0.0, 255.0);
    let h_bin = (h * HUE_BINS as f32 / HUE_RANGE) as usize;
    let s_bin = (s * SAT_BINS as f32 / SAT_RANGE) as usize;
    (h_bin.min(HUE_BINS - 1), s_bin.min(SAT_BINS - 1))
}

/// Convert one 8-bit RGB pixel to HSV on the OpenCV scale:
/// H in [0, 180), S and V in [0, 255].
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let s = if max > 0.0 { diff / max * 255.0 } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / diff
    } else if max == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    (h / 2.0, s, max)
}

/// Rescale values so the minimum maps to 0 and the maximum to 1.
/// A flat histogram becomes all zeros.
fn normalize_min_max(values: &mut [f32]) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > f32::EPSILON { (*v - min) / range } else { 0.0 };
    }
}
