use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector on
    /// either side yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Outcome of comparing one guest reference against the faces in a photo.
#[derive(Debug, Clone)]
pub struct PhotoMatch {
    pub matched: bool,
    /// Cosine similarity of the closest face in the photo [-1, 1].
    pub similarity: f32,
}

/// Strategy for deciding whether a guest appears in a photo, given the
/// embeddings of every face detected in it.
pub trait PhotoMatcher {
    fn compare(&self, guest: &Embedding, faces: &[Embedding], threshold: f32) -> PhotoMatch;
}

/// Cosine similarity matcher over all faces in a photo.
///
/// A photo matches when its best face reaches the threshold, so one photo
/// can match several guests — each comparison is independent.
pub struct CosineMatcher;

impl PhotoMatcher for CosineMatcher {
    fn compare(&self, guest: &Embedding, faces: &[Embedding], threshold: f32) -> PhotoMatch {
        let mut best = f32::NEG_INFINITY;

        for face in faces {
            let sim = guest.similarity(face);
            if sim > best {
                best = sim;
            }
        }

        if best == f32::NEG_INFINITY {
            // No faces in the photo at all.
            return PhotoMatch { matched: false, similarity: 0.0 };
        }

        PhotoMatch {
            matched: best >= threshold,
            similarity: best,
        }
    }
}
