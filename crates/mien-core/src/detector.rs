//! Face detection via ONNX Runtime.
//!
//! Wraps an SCRFD-style anchor-free detector (three output strides, two
//! anchors per cell) behind the narrow [`FaceDetector`] contract. Only the
//! score and box heads are decoded; landmark outputs are ignored.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::FaceRegion;

// --- Named constants (different normalization than the embedder!) ---
const DETECT_INPUT_SIZE: u32 = 640;
const DETECT_MEAN: f32 = 127.5;
const DETECT_STD: f32 = 128.0;
const DETECT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DETECT_NMS_THRESHOLD: f32 = 0.4;
const DETECT_STRIDES: [usize; 3] = [8, 16, 32];
const DETECT_ANCHORS_PER_CELL: usize = 2;
/// Regions smaller than this (in original-image pixels) are discarded.
const MIN_FACE_PX: f32 = 8.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates face regions in a full image.
///
/// An empty result is a legitimate outcome ("no face in this image"),
/// not an error.
pub trait FaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// A decoded box in model-input (letterboxed) coordinates.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// SCRFD-style ONNX face detector.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
}

impl OnnxFaceDetector {
    /// Load the detection ONNX model from the given path.
    ///
    /// Outputs are taken positionally: scores for strides [8, 16, 32]
    /// first, then the matching box heads. Landmark heads, if present,
    /// trail those and are left untouched.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = num_outputs,
            "loaded detection model"
        );

        if num_outputs < 2 * DETECT_STRIDES.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "detector requires {} outputs ({} strides x score/box), got {num_outputs}",
                2 * DETECT_STRIDES.len(),
                DETECT_STRIDES.len(),
            )));
        }

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Letterbox the image into the square model input (top-left anchored,
    /// black padding) and normalize into a NCHW tensor.
    ///
    /// Returns the tensor and the applied scale factor.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
        let size = DETECT_INPUT_SIZE;
        let (width, height) = image.dimensions();
        let scale = size as f32 / width.max(height).max(1) as f32;
        let new_width = ((width as f32 * scale) as u32).clamp(1, size);
        let new_height = ((height as f32 * scale) as u32).clamp(1, size);

        let resized = image::imageops::resize(
            image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            // The detector expects BGR channel order.
            let bgr = [pixel[2], pixel[1], pixel[0]];
            for (channel, value) in bgr.iter().enumerate() {
                tensor[[0, channel, y as usize, x as usize]] =
                    (f32::from(*value) - DETECT_MEAN) / DETECT_STD;
            }
        }
        (tensor, scale)
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = Self::preprocess(image);

        let candidates = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("session lock poisoned".into()))?;
            let outputs =
                session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            let mut candidates = Vec::new();
            for (i, stride) in DETECT_STRIDES.iter().enumerate() {
                let (_, scores) = outputs[i]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("score head {i}: {e}")))?;
                let (_, boxes) = outputs[DETECT_STRIDES.len() + i]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("box head {i}: {e}")))?;

                let grid = (DETECT_INPUT_SIZE as usize / stride).pow(2);
                let anchors = grid * DETECT_ANCHORS_PER_CELL;
                if scores.len() != anchors || boxes.len() != anchors * 4 {
                    return Err(DetectorError::InferenceFailed(format!(
                        "stride {stride}: expected {anchors} anchors, got {} scores / {} box values",
                        scores.len(),
                        boxes.len(),
                    )));
                }

                candidates.extend(decode_stride(
                    scores,
                    boxes,
                    *stride,
                    DETECT_CONFIDENCE_THRESHOLD,
                ));
            }
            candidates
        };

        let kept = nms(candidates, DETECT_NMS_THRESHOLD);

        let mut regions: Vec<FaceRegion> = kept
            .into_iter()
            .filter_map(|c| {
                // De-letterbox into original image coordinates.
                let x1 = (c.x1 / scale).clamp(0.0, width as f32);
                let y1 = (c.y1 / scale).clamp(0.0, height as f32);
                let x2 = (c.x2 / scale).clamp(0.0, width as f32);
                let y2 = (c.y2 / scale).clamp(0.0, height as f32);
                let (w, h) = (x2 - x1, y2 - y1);
                if w < MIN_FACE_PX || h < MIN_FACE_PX {
                    return None;
                }
                Some(FaceRegion {
                    x: x1,
                    y: y1,
                    width: w,
                    height: h,
                    confidence: c.confidence,
                })
            })
            .collect();

        regions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(regions)
    }
}

/// Decode one stride's anchor-free outputs: each anchor predicts distances
/// (left, top, right, bottom) from its grid-cell center, in stride units.
fn decode_stride(scores: &[f32], boxes: &[f32], stride: usize, threshold: f32) -> Vec<Candidate> {
    let grid = DETECT_INPUT_SIZE as usize / stride;
    let mut out = Vec::new();

    for cell in 0..grid * grid {
        let cy = (cell / grid * stride) as f32;
        let cx = (cell % grid * stride) as f32;

        for anchor in 0..DETECT_ANCHORS_PER_CELL {
            let idx = cell * DETECT_ANCHORS_PER_CELL + anchor;
            let confidence = scores[idx];
            if confidence < threshold {
                continue;
            }

            let b = idx * 4;
            let left = boxes[b] * stride as f32;
            let top = boxes[b + 1] * stride as f32;
            let right = boxes[b + 2] * stride as f32;
            let bottom = boxes[b + 3] * stride as f32;

            out.push(Candidate {
                x1: cx - left,
                y1: cy - top,
                x2: cx + right,
                y2: cy + bottom,
                confidence,
            });
        }
    }
    out
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .confidence
            .partial_cmp(&candidates[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::new();
    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        kept.push(candidates[i].clone());
        for &j in order.iter().skip(rank + 1) {
            if !suppressed[j] && iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    kept
}

/// Intersection-over-union of two candidate boxes.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    #[test]
    fn test_iou_disjoint() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(5.0, 0.0, 15.0, 10.0, 1.0);
        // Intersection 50, union 150.
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_lower_confidence() {
        let candidates = vec![
            candidate(0.0, 0.0, 10.0, 10.0, 0.6),
            candidate(1.0, 1.0, 11.0, 11.0, 0.9),
            candidate(100.0, 100.0, 120.0, 120.0, 0.7),
        ];

        let kept = nms(candidates, DETECT_NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_grid_cell_to_box() {
        let stride = 32;
        let grid = DETECT_INPUT_SIZE as usize / stride;
        let anchors = grid * grid * DETECT_ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];

        // One confident anchor in cell (row 2, col 3), first anchor slot,
        // predicting 1 stride-unit in every direction.
        let cell = 2 * grid + 3;
        let idx = cell * DETECT_ANCHORS_PER_CELL;
        scores[idx] = 0.95;
        for offset in 0..4 {
            boxes[idx * 4 + offset] = 1.0;
        }

        let decoded = decode_stride(&scores, &boxes, stride, DETECT_CONFIDENCE_THRESHOLD);
        assert_eq!(decoded.len(), 1);
        let c = &decoded[0];
        assert_eq!(c.x1, (3 * stride - stride) as f32);
        assert_eq!(c.y1, (2 * stride - stride) as f32);
        assert_eq!(c.x2, (3 * stride + stride) as f32);
        assert_eq!(c.y2, (2 * stride + stride) as f32);
        assert!((c.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_filters_below_threshold() {
        let stride = 32;
        let grid = DETECT_INPUT_SIZE as usize / stride;
        let anchors = grid * grid * DETECT_ANCHORS_PER_CELL;

        let scores = vec![0.4f32; anchors];
        let boxes = vec![1.0f32; anchors * 4];
        let decoded = decode_stride(&scores, &boxes, stride, DETECT_CONFIDENCE_THRESHOLD);
        assert!(decoded.is_empty());
    }
}
