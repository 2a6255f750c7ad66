//! facecheck-core — image decoding, face embedding and comparison.
//!
//! Uses SCRFD for face detection and a dlib ResNet for 128-d face embeddings, both
//! running via ONNX Runtime for CPU inference. Embeddings are compared by
//! Euclidean distance against [`MATCH_THRESHOLD`].

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod encoder;
pub mod recognizer;
pub mod types;

pub use decode::{decode_image, decode_image_bytes, DecodeError};
pub use detector::{DetectorOptions, FaceDetector};
pub use encoder::{default_model_dir, EncoderError, FaceEncoder, ModelPaths, OnnxFaceEncoder};
pub use recognizer::{FaceRecognizer, RecognizerOptions};
pub use types::{compare, BoundingBox, CompareError, Embedding, Verdict, MATCH_THRESHOLD};
