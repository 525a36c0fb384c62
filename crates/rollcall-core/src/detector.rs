//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640x640 model input, decodes the three
//! stride heads (anchor-free, two anchors per cell) and applies NMS.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} (place det_10g.onnx in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can find faces in an RGB image.
pub trait FaceLocator {
    /// Return face boxes, most confident first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError>;
}

/// A raw detection in original-frame coordinates.
#[derive(Debug, Clone, Copy)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// Scale and padding applied when letterboxing into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
    min_face_size: u32,
}

impl ScrfdDetector {
    /// Load the SCRFD model. Faces narrower or shorter than `min_face_size`
    /// pixels are discarded.
    pub fn load(model_path: &Path, min_face_size: u32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_indices,
            min_face_size,
        })
    }

    fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = image.dimensions();
        let letterbox = Letterbox::fit(width, height);
        let new_w = ((width as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding stays at 0.0, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let (px, py) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x as usize + px, y as usize + py);
            if tx >= size || ty >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocator for ScrfdDetector {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            detections.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let min = self.min_face_size as f32;
        let faces: Vec<FaceBox> = nms(detections, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter(|d| d.x2 - d.x1 >= min && d.y2 - d.y1 >= min)
            .map(|d| FaceBox::from_xywh(d.x1, d.y1, d.x2 - d.x1, d.y2 - d.y1))
            .collect();

        tracing::trace!(count = faces.len(), "faces located");
        Ok(faces)
    }
}

/// Map stride slots to output tensors, by name ("score_8", "bbox_16", ...)
/// when the export names them, otherwise by the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, ...].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0usize, 0usize); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => named[slot] = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    named
}

/// Decode the detections of one stride level into frame coordinates.
fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let off = idx * 4;
            let deltas = bboxes.get(off..off + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - deltas[0] * s, ay - deltas[1] * s);
            let (x2, y2) = letterbox.unmap(ax + deltas[2] * s, ay + deltas[3] * s);
            Some(Detection { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter = Detection {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection { x1: x, y1: y, x2: x + w, y2: y + h, score }
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &det(20.0, 20.0, 5.0, 5.0, 1.0)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = nms(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_unmap() {
        let lb = Letterbox::fit(640, 480);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.unmap(100.0, 180.0), (100.0, 100.0));
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox::fit(640, 640);
        let grid = 640 / 32;
        let mut scores = vec![0.0f32; grid * grid * 2];
        let mut bboxes = vec![0.0f32; grid * grid * 2 * 4];
        // Cell (x=2, y=1), first anchor.
        let idx = (grid + 2) * 2;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);

        let dets = decode_stride(&scores, &bboxes, 32, &lb);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (32.0, 0.0, 96.0, 96.0));
    }

    #[test]
    fn test_discover_output_indices() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&named), [(1, 0), (3, 2), (5, 4)]);

        let generic: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&generic), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_preprocess_pads_with_mean() {
        let img = RgbImage::from_pixel(640, 320, image::Rgb([255, 255, 255]));
        let (tensor, lb) = ScrfdDetector::preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-3);
    }
}
