use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum L2 distance (exclusive) at which two embeddings are the same person.
pub const MATCH_THRESHOLD: f64 = 0.6;

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

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("encoding has {left} dimensions, expected {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Face embedding vector.
///
/// Serializes as a bare JSON array of numbers. Carries no model provenance:
/// comparing embeddings from different models yields a meaningless distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean (L2) distance, accumulated in f64.
    ///
    /// Both vectors must have the same length.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f64, CompareError> {
        if self.len() != other.len() {
            return Err(CompareError::DimensionMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        let sum: f64 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let d = f64::from(a) - f64::from(b);
                d * d
            })
            .sum();

        Ok(sum.sqrt())
    }
}

/// Outcome of comparing two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "match")]
    pub matched: bool,
    pub distance: f64,
}

impl Verdict {
    pub fn from_distance(distance: f64) -> Self {
        Self {
            matched: distance < MATCH_THRESHOLD,
            distance,
        }
    }
}

/// Compare two embeddings against [`MATCH_THRESHOLD`].
pub fn compare(known: &Embedding, candidate: &Embedding) -> Result<Verdict, CompareError> {
    known.euclidean_distance(candidate).map(Verdict::from_distance)
}
