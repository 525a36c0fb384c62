//! Frame type and pixel conversions: YUYV/RGB3 to RGB, dark detection.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// A captured colour camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
    pub timestamp: std::time::Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            sequence,
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Horizontally flipped copy, so the preview behaves like a mirror.
    pub fn mirrored(&self) -> Frame {
        Frame {
            image: imageops::flip_horizontal(&self.image),
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    /// Copy resized by `scale` (e.g. 0.25 for quarter size), at least 1x1.
    pub fn downscaled(&self, scale: f32) -> RgbImage {
        let w = ((self.width() as f32 * scale) as u32).max(1);
        let h = ((self.height() as f32 * scale) as u32).max(1);
        imageops::resize(&self.image, w, h, FilterType::Triangle)
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.image.pixels().len();
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0) as f32).sum::<f32>() / pixels as f32
    }
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Wrap a packed RGB24 buffer.
pub fn rgb24_to_image(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = image.pixels().len();
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p.0) < 32).count();
    (dark as f32 / total as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
