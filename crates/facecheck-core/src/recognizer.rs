//! dlib ResNet face recognizer via ONNX Runtime.
//!
//! Turns an aligned 150×150 RGB chip into a 128-dimensional embedding. The
//! network's output is used as-is: its metric space is what makes the fixed
//! 0.6 Euclidean threshold meaningful, so it is not renormalized.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Length of a dlib face descriptor.
pub const EMBEDDING_DIM: usize = 128;

/// Per-channel means subtracted by dlib's `input_rgb_image_sized` layer (R, G, B).
const CHANNEL_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const CHANNEL_SCALE: f32 = 256.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Recognizer tuning.
#[derive(Debug, Clone)]
pub struct RecognizerOptions {
    /// Reject model outputs of any other length. `None` accepts whatever the model emits.
    pub expected_dim: Option<usize>,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            expected_dim: Some(EMBEDDING_DIM),
            intra_threads: 2,
        }
    }
}

/// dlib-compatible face recognizer.
pub struct FaceRecognizer {
    session: Session,
    options: RecognizerOptions,
}

impl FaceRecognizer {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &Path, options: RecognizerOptions) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            expected_dim = ?options.expected_dim,
            "loaded face recognition model"
        );

        Ok(Self { session, options })
    }

    /// Align the detected face and extract its embedding.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(image, landmarks_of(face)?);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = finish_embedding(raw, self.options.expected_dim)?;
        Ok(Embedding::new(values))
    }
}

fn landmarks_of(face: &BoundingBox) -> Result<&[(f32, f32); 5], RecognizerError> {
    face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)
}

/// Validate the raw output: non-empty, finite, and of the pinned length.
fn finish_embedding(raw: &[f32], expected_dim: Option<usize>) -> Result<Vec<f32>, RecognizerError> {
    if raw.is_empty() {
        return Err(RecognizerError::InferenceFailed("model produced an empty embedding".into()));
    }
    if let Some(dim) = expected_dim {
        if raw.len() != dim {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {dim}-dim embedding, got {}",
                raw.len()
            )));
        }
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("model produced non-finite values".into()));
    }
    Ok(raw.to_vec())
}

/// Convert an aligned chip into a mean-subtracted 1×3×150×150 tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - CHANNEL_MEAN[c]) / CHANNEL_SCALE;
        }
    }
    tensor
}
