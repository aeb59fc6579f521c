//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model over decoded RGB photographs: letterbox resize to
//! 640×640, 3-stride anchor-free decoding, then NMS.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

/// Default minimum confidence for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox geometry for mapping detections back to photo coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector for still photographs.
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        // SCRFD exports name tensors either as "score_8"/"bbox_16"/"kps_32"
        // or as opaque integers; map by name when possible.
        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            confidence_threshold,
            stride_indices,
        })
    }

    /// Detect faces in a photo, returning bounding boxes sorted by confidence
    /// (highest first), with landmarks where the model produced them.
    pub fn detect(&mut self, photo: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = self.preprocess(photo);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                self.confidence_threshold,
                &mut all_detections,
            );
        }

        let mut result = nms(all_detections, DET_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }

    /// Letterbox-resize the photo into a 640×640 NCHW float tensor.
    ///
    /// The photo is scaled to fit, centered, and normalized to the SCRFD
    /// input distribution; padding stays at the normalized mean (0.0).
    fn preprocess(&self, photo: &RgbImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = photo.dimensions();
        let size = DET_INPUT_SIZE as f32;

        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round() as u32;
        let new_h = (height as f32 * scale).round() as u32;
        let pad_x = (size - new_w as f32) / 2.0;
        let pad_y = (size - new_h as f32) / 2.0;

        let resized = image::imageops::resize(photo, new_w, new_h, FilterType::Triangle);

        let side = DET_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        let x_off = pad_x.floor() as usize;
        let y_off = pad_y.floor() as usize;

        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = x as usize + x_off;
            let ty = y as usize + y_off;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - DET_MEAN) / DET_STD;
            }
        }

        (tensor, Letterbox { scale, pad_x, pad_y })
    }
}

/// Discover output tensor ordering by name, falling back to the standard
/// positional layout ([0-2] scores, [3-5] bboxes, [6-8] kps).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = DET_STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = DET_STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping"
        );
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode detections for a single stride level into `out`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
    out: &mut Vec<BoundingBox>,
) {
    let grid = DET_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    // Unmap a letterboxed coordinate into photo space.
    let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        // bbox tensor holds [left, top, right, bottom] offsets in stride units
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = unmap_x(anchor_cx - bboxes[off] * stride as f32);
        let y1 = unmap_y(anchor_cy - bboxes[off + 1] * stride as f32);
        let x2 = unmap_x(anchor_cx + bboxes[off + 2] * stride as f32);
        let y2 = unmap_y(anchor_cy + bboxes[off + 3] * stride as f32);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                let lx = anchor_cx + kps[kps_off + i * 2] * stride as f32;
                let ly = anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32;
                *lm = (unmap_x(lx), unmap_y(ly));
            }
            Some(lms)
        } else {
            None
        };

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            make_bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let new_w = (width * scale).round();
        let new_h = (height * scale).round();
        let letterbox = Letterbox {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let boxed_x = orig_x * scale + letterbox.pad_x;
        let boxed_y = orig_y * scale + letterbox.pad_y;

        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);

        assert_eq!(indices[0], (0, 3, 6));
        assert_eq!(indices[1], (1, 4, 7));
        assert_eq!(indices[2], (2, 5, 8));
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);

        assert_eq!(indices[0], (2, 0, 1));
        assert_eq!(indices[1], (5, 3, 4));
        assert_eq!(indices[2], (8, 6, 7));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        // Opaque numeric names — should fall back to positional
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_below_threshold_skipped() {
        let grid = 640 / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let scores = vec![0.1f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, &letterbox, 0.5, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_decode_stride_emits_landmarks() {
        let grid = 640 / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.9;
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, &letterbox, 0.5, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].landmarks.is_some());
        // Anchor at the grid origin, offsets of 1 stride each way: 64-wide box
        assert!((out[0].width - 64.0).abs() < 1e-4);
    }
}
