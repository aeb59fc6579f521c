//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from aligned 112×112 RGB face
//! crops using the w600k_r50 ArcFace model.

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD's 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face in a photo.
    ///
    /// The face must carry landmarks from the SCRFD detector; it is aligned
    /// to the canonical 112×112 position before extraction. The returned
    /// embedding is L2-normalized.
    pub fn extract(
        &mut self,
        photo: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = alignment::align_face(photo, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess an aligned 112×112 RGB crop into a NCHW float tensor.
    fn preprocess(aligned: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            image::Rgb([128, 128, 128]),
        );
        let tensor = FaceRecognizer::preprocess(&aligned);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ARCFACE_INPUT_SIZE as usize, ARCFACE_INPUT_SIZE as usize]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = RgbImage::from_pixel(
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            image::Rgb([128, 128, 128]),
        );
        let tensor = FaceRecognizer::preprocess(&aligned);
        // (128 - 127.5) / 127.5 ≈ 0.00392
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_channel_separation() {
        // Distinct channel values must land in distinct tensor planes.
        let aligned = RgbImage::from_pixel(
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            image::Rgb([255, 128, 0]),
        );
        let tensor = FaceRecognizer::preprocess(&aligned);
        let r = tensor[[0, 0, 10, 10]];
        let g = tensor[[0, 1, 10, 10]];
        let b = tensor[[0, 2, 10, 10]];
        assert!(r > g && g > b, "r={r} g={g} b={b}");
        assert!((r - 1.0).abs() < 1e-6);
        assert!((b + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_landmarks_detected_at_type_level() {
        let face = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        // extract() refuses faces without landmarks; a FaceRecognizer cannot
        // be built without a model file, so verify the precondition here.
        assert!(face.landmarks.is_none());
    }
}
