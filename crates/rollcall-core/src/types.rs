use serde::{Deserialize, Serialize};

/// Face location in pixel coordinates, edges inclusive of `top`/`left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Build from an `(x, y, width, height)` rectangle.
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            top: y.round() as i32,
            right: (x + width).round() as i32,
            bottom: (y + height).round() as i32,
            left: x.round() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Area in square pixels; zero for degenerate boxes.
    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }

    /// Horizontal and vertical centre.
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    /// Multiply every edge by `factor`, truncating toward zero.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            top: (self.top as f32 * factor) as i32,
            right: (self.right as f32 * factor) as i32,
            bottom: (self.bottom as f32 * factor) as i32,
            left: (self.left as f32 * factor) as i32,
        }
    }

    /// Clip to an image of `width` x `height`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        Self {
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
            left: self.left.clamp(0, w),
        }
    }
}

/// Pick the face with the largest area. Ties keep the earliest box.
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces.iter().copied().fold(None, |best, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Flattened hue/saturation histogram describing a face crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding(pub Vec<f32>);

impl Encoding {
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pearson correlation in [-1, 1]. Returns 0 for mismatched lengths
    /// or when either side has no variance.
    pub fn correlation(&self, other: &Encoding) -> f32 {
        let n = self.0.len();
        if n == 0 || n != other.0.len() {
            return 0.0;
        }

        let mean_a = self.0.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let mean_b = other.0.iter().map(|&v| v as f64).sum::<f64>() / n as f64;

        let mut cov = 0.0f64;
        let mut var_a = 0.0f64;
        let mut var_b = 0.0f64;
        for (&a, &b) in self.0.iter().zip(other.0.iter()) {
            let da = a as f64 - mean_a;
            let db = b as f64 - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denom = (var_a * var_b).sqrt();
        if denom > f64::EPSILON {
            (cov / denom) as f32
        } else {
            0.0
        }
    }

    /// Element-wise mean of same-length encodings.
    pub fn mean(encodings: &[Encoding]) -> Option<Encoding> {
        let first = encodings.first()?;
        let len = first.len();
        if encodings.iter().any(|e| e.len() != len) {
            return None;
        }

        let mut sum = vec![0.0f64; len];
        for enc in encodings {
            for (acc, &v) in sum.iter_mut().zip(enc.0.iter()) {
                *acc += v as f64;
            }
        }
        let count = encodings.len() as f64;
        Some(Encoding(sum.into_iter().map(|v| (v / count) as f32).collect()))
    }
}

/// An enrolled student as seen by the matcher.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub student_id: String,
    pub student_name: String,
    pub encoding: Encoding,
}

/// Result of matching a probe encoding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    /// Best correlation seen, whether or not it cleared the threshold.
    pub score: f32,
    /// `1 - score` for a match, 1.0 otherwise.
    pub distance: f32,
}

impl MatchResult {
    pub fn no_match(score: f32) -> Self {
        Self {
            matched: false,
            student_id: None,
            student_name: None,
            score,
            distance: 1.0,
        }
    }
}

/// Strategy for comparing a probe encoding against enrolled students.
pub trait Matcher {
    fn compare(&self, probe: &Encoding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Histogram correlation matcher. Scans the whole gallery and keeps the
/// best-scoring entry; a match needs a score strictly above `threshold`.
pub struct CorrelationMatcher;

impl Matcher for CorrelationMatcher {
    fn compare(&self, probe: &Encoding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.encoding.is_empty() {
                continue;
            }
            let score = probe.correlation(&entry.encoding);
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_score > threshold => MatchResult {
                matched: true,
                student_id: Some(gallery[idx].student_id.clone()),
                student_name: Some(gallery[idx].student_name.clone()),
                score: best_score,
                distance: 1.0 - best_score,
            },
            _ => MatchResult::no_match(if best_idx.is_some() { best_score } else { 0.0 }),
        }
    }
}

/// Convert a distance (0.0 best) into a whole-number match percentage.
pub fn match_percentage(distance: f32) -> u32 {
    if distance >= 1.0 {
        return 0;
    }
    (100.0 * (1.0 - distance.max(0.0))).floor() as u32
}

/// Human-readable match quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl MatchQuality {
    pub fn from_distance(distance: f32) -> Self {
        if distance < 0.40 {
            MatchQuality::Excellent
        } else if distance < 0.50 {
            MatchQuality::Good
        } else if distance < 0.60 {
            MatchQuality::Fair
        } else {
            MatchQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchQuality::Excellent => "Excellent",
            MatchQuality::Good => "Good",
            MatchQuality::Fair => "Fair",
            MatchQuality::Poor => "Poor",
        }
    }
}

impl std::fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            student_id: id.into(),
            student_name: name.into(),
            encoding: Encoding(values),
        }
    }

    #[test]
    fn test_correlation_identical() {
        let a = Encoding(vec![0.1, 0.5, 0.9, 0.2]);
        assert!((a.correlation(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_correlation_inverted() {
        let a = Encoding(vec![0.0, 1.0, 0.0, 1.0]);
        let b = Encoding(vec![1.0, 0.0, 1.0, 0.0]);
        assert!((a.correlation(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_correlation_flat_is_zero() {
        let a = Encoding(vec![0.0; 8]);
        let b = Encoding(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_eq!(a.correlation(&b), 0.0);
    }

    #[test]
    fn test_correlation_length_mismatch() {
        let a = Encoding(vec![0.1, 0.2]);
        let b = Encoding(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.correlation(&b), 0.0);
    }

    #[test]
    fn test_mean_encoding() {
        let mean = Encoding::mean(&[Encoding(vec![0.0, 1.0]), Encoding(vec![1.0, 0.0])]).unwrap();
        assert_eq!(mean, Encoding(vec![0.5, 0.5]));
        assert!(Encoding::mean(&[]).is_none());
        assert!(Encoding::mean(&[Encoding(vec![1.0]), Encoding(vec![1.0, 2.0])]).is_none());
    }

    #[test]
    fn test_matcher_picks_best_entry() {
        let probe = Encoding(vec![0.0, 1.0, 0.0, 0.5]);
        let gallery = vec![
            entry("24054-EC-001", "Decoy", vec![1.0, 0.0, 1.0, 0.5]),
            entry("24054-EC-002", "Match", vec![0.0, 1.0, 0.0, 0.5]),
        ];

        let result = CorrelationMatcher.compare(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("24054-EC-002"));
        assert_eq!(result.student_name.as_deref(), Some("Match"));
        assert!(result.distance.abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let probe = Encoding(vec![0.0, 1.0, 0.0, 0.5]);
        let gallery = vec![entry("24054-EC-002", "Match", vec![0.0, 1.0, 0.0, 0.5])];

        let result = CorrelationMatcher.compare(&probe, &gallery, 1.0);
        assert!(!result.matched);
        assert_eq!(result.distance, 1.0);
        assert!((result.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_skips_empty_encodings() {
        let probe = Encoding(vec![0.0, 1.0]);
        let gallery = vec![entry("24054-EC-001", "Nobody", vec![])];
        let result = CorrelationMatcher.compare(&probe, &gallery, 0.6);
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = CorrelationMatcher.compare(&Encoding(vec![1.0, 0.0]), &[], 0.6);
        assert_eq!(result, MatchResult::no_match(0.0));
    }

    #[test]
    fn test_match_percentage() {
        assert_eq!(match_percentage(0.0), 100);
        assert_eq!(match_percentage(0.25), 75);
        assert_eq!(match_percentage(1.0), 0);
        assert_eq!(match_percentage(1.7), 0);
    }

    #[test]
    fn test_match_quality_bands() {
        assert_eq!(MatchQuality::from_distance(0.1), MatchQuality::Excellent);
        assert_eq!(MatchQuality::from_distance(0.45), MatchQuality::Good);
        assert_eq!(MatchQuality::from_distance(0.55), MatchQuality::Fair);
        assert_eq!(MatchQuality::from_distance(0.60), MatchQuality::Poor);
    }

    #[test]
    fn test_largest_face() {
        let faces = [
            FaceBox::new(0, 10, 10, 0),
            FaceBox::new(0, 50, 40, 0),
            FaceBox::new(0, 20, 20, 0),
        ];
        assert_eq!(largest_face(&faces), Some(FaceBox::new(0, 50, 40, 0)));
        assert_eq!(largest_face(&[]), None);
    }

    #[test]
    fn test_facebox_scaling_and_clamp() {
        let face = FaceBox::new(10, 40, 30, 20);
        assert_eq!(face.scaled(4.0), FaceBox::new(40, 160, 120, 80));
        assert_eq!(face.width(), 20);
        assert_eq!(face.height(), 20);
        let clamped = FaceBox::new(-5, 700, 500, -1).clamp_to(640, 480);
        assert_eq!(clamped, FaceBox::new(0, 640, 480, 0));
    }
}
