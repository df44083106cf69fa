//! Face signature extraction via ONNX Runtime.
//!
//! Wraps an ArcFace-style embedding model behind the narrow
//! [`SignatureExtractor`] contract: a prepared face crop in, a fixed-length
//! vector (or nothing) out. The model itself is an opaque capability.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::Signature;

// --- Named constants ---
const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
const EMBED_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a prepared face crop into a signature vector.
///
/// `Ok(None)` means the model cannot represent the crop (degenerate
/// input). Callers must treat it as "skip this face", never as a fault.
/// Pure function of the input pixels and model weights; no side effects.
pub trait SignatureExtractor {
    fn extract(&self, crop: &RgbImage) -> Result<Option<Signature>, ExtractorError>;
}

/// ArcFace-style ONNX signature extractor.
pub struct OnnxExtractor {
    session: Mutex<Session>,
}

impl OnnxExtractor {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Resize the crop to the model input and normalize into a NCHW tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = EMBED_INPUT_SIZE;
        let resized =
            image::imageops::resize(crop, size, size, image::imageops::FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    (f32::from(pixel[channel]) - EMBED_MEAN) / EMBED_STD;
            }
        }
        tensor
    }
}

impl SignatureExtractor for OnnxExtractor {
    fn extract(&self, crop: &RgbImage) -> Result<Option<Signature>, ExtractorError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(None);
        }

        let input = Self::preprocess(crop);

        let mut session = self
            .session
            .lock()
            .map_err(|_| ExtractorError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("signature output: {e}")))?;

        let values: Vec<f32> = raw_data.to_vec();
        if values.len() != EMBED_DIM {
            return Err(ExtractorError::InferenceFailed(format!(
                "expected {EMBED_DIM}-dim signature, got {}",
                values.len()
            )));
        }

        // Returned as-is, not unit-normalized: matching is cosine-based and
        // must stay scale-resilient anyway.
        Ok(Some(Signature { values }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(48, 64, Rgb([128, 128, 128]));
        let tensor = OnnxExtractor::preprocess(&crop);
        assert_eq!(
            tensor.shape(),
            &[1, 3, EMBED_INPUT_SIZE as usize, EMBED_INPUT_SIZE as usize]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let crop = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = OnnxExtractor::preprocess(&crop);
        let expected = (128.0 - EMBED_MEAN) / EMBED_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_normalization_range() {
        // Extremes map to the edges of the symmetric [-1, 1] range.
        let black = RgbImage::from_pixel(112, 112, Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(112, 112, Rgb([255, 255, 255]));
        assert!((OnnxExtractor::preprocess(&black)[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((OnnxExtractor::preprocess(&white)[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }
}
