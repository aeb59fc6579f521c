//! festa-core — Face detection and recognition for event photographs.
//!
//! Uses SCRFD for face detection and ArcFace for embedding extraction,
//! both running via ONNX Runtime for CPU inference on decoded RGB images.

pub mod alignment;
pub mod detector;
pub mod imagery;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, CosineMatcher, Embedding, PhotoMatch, PhotoMatcher};
