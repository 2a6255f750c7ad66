//! Face embedding extraction: detect → align → embed.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, RecognizerOptions};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_DETECTOR_MODEL: &str = "det_10g.onnx";
pub const DEFAULT_RECOGNIZER_MODEL: &str = "dlib_face_recognition_resnet_model_v1.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces one embedding per face found in an image.
///
/// Embeddings are ordered by detection confidence, highest first. An empty
/// vector means no face was found; that is not an error at this level.
pub trait FaceEncoder {
    fn face_encodings(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError>;

    /// Embedding of the most confident face only, or `None` if there is none.
    ///
    /// Implementations should override this when embedding each face is
    /// expensive; the default encodes every face and keeps the first.
    fn first_face_encoding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, EncoderError> {
        Ok(self.face_encodings(image)?.into_iter().next())
    }
}

/// Locations of the two ONNX model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DEFAULT_DETECTOR_MODEL),
            recognizer: dir.join(DEFAULT_RECOGNIZER_MODEL),
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, then
/// `$HOME/.local/share/facecheck/models`, then `/usr/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("facecheck/models");
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".local/share/facecheck/models"),
        _ => PathBuf::from("/usr/share/facecheck/models"),
    }
}

/// SCRFD + dlib ResNet pipeline backed by ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(
        paths: &ModelPaths,
        detector_options: DetectorOptions,
        recognizer_options: RecognizerOptions,
    ) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&paths.detector, detector_options)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer, recognizer_options)?;
        Ok(Self { detector, recognizer })
    }

    /// Mutable access to the detector for diagnostics.
    pub fn detector_mut(&mut self) -> &mut FaceDetector {
        &mut self.detector
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn face_encodings(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "encoding detected faces");

        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EncoderError::from))
            .collect()
    }

    fn first_face_encoding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, EncoderError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "encoding most confident face");
        let recognizer = &mut self.recognizer;
        encode_first(&faces, |face| recognizer.extract(image, face).map_err(EncoderError::from))
    }
}

/// Run `extract` on the first detection only.
fn encode_first<F>(faces: &[BoundingBox], extract: F) -> Result<Option<Embedding>, EncoderError>
where
    F: FnOnce(&BoundingBox) -> Result<Embedding, EncoderError>,
{
    faces.first().map(extract).transpose()
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn face_encodings(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        (**self).face_encodings(image)
    }

    fn first_face_encoding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, EncoderError> {
        (**self).first_face_encoding(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.recognizer, PathBuf::from("/opt/models/dlib_face_recognition_resnet_model_v1.onnx"));
    }

    #[test]
    fn test_load_missing_model_fails_fast() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/facecheck-models"));
        let err = OnnxFaceEncoder::load(&paths, DetectorOptions::default(), RecognizerOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, EncoderError::Detector(DetectorError::ModelNotFound(_))));
    }

    #[test]
    fn test_default_model_dir_ends_with_models() {
        assert!(default_model_dir().ends_with("models"));
    }

    struct Constant(Vec<Embedding>);

    impl FaceEncoder for Constant {
        fn face_encodings(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_boxed_encoder_delegates() {
        let mut boxed: Box<dyn FaceEncoder> = Box::new(Constant(vec![Embedding::new(vec![1.0])]));
        let out = boxed.face_encodings(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(out, vec![Embedding::new(vec![1.0])]);
    }

    #[test]
    fn test_default_first_face_encoding_takes_first() {
        let mut enc = Constant(vec![Embedding::new(vec![1.0]), Embedding::new(vec![2.0])]);
        let first = enc.first_face_encoding(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(first, Some(Embedding::new(vec![1.0])));

        let mut empty = Constant(Vec::new());
        assert_eq!(empty.first_face_encoding(&RgbImage::new(1, 1)).unwrap(), None);
    }

    fn detection(confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_encode_first_extracts_once() {
        let faces = vec![detection(0.9), detection(0.8), detection(0.7)];
        let mut calls = Vec::new();
        let out = encode_first(&faces, |face| {
            calls.push(face.confidence);
            Ok(Embedding::new(vec![face.confidence]))
        })
        .unwrap();
        assert_eq!(calls, vec![0.9]);
        assert_eq!(out, Some(Embedding::new(vec![0.9])));
    }

    #[test]
    fn test_encode_first_without_faces_skips_extraction() {
        let out = encode_first(&[], |_| -> Result<Embedding, EncoderError> {
            panic!("no face to extract")
        })
        .unwrap();
        assert_eq!(out, None);
    }
}
