//! rollcall-core: face detection, encoding and matching.
//!
//! SCRFD locates faces via ONNX Runtime; each face is summarised as a
//! hue/saturation histogram and matched against enrolled students by
//! correlation.

pub mod detector;
pub mod encoder;
pub mod types;

pub use detector::{DetectorError, FaceLocator, ScrfdDetector};
pub use encoder::{encode_face, EncodeError};
pub use types::{
    largest_face, match_percentage, CorrelationMatcher, Encoding, FaceBox, GalleryEntry,
    MatchQuality, MatchResult, Matcher,
};
