//! Face detection capability consumed by the session

use async_trait::async_trait;
use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detector error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Detector not loaded")]
    NotReady,
}

/// Face bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }
}

/// Face embedding produced by the recognition model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDescriptor(pub Vec<f32>);

impl FaceDescriptor {
    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.0 {
                *v /= norm;
            }
        }
        self
    }

    /// Euclidean distance; `None` when the dimensions differ
    pub fn distance(&self, other: &FaceDescriptor) -> Option<f32> {
        if self.0.len() != other.0.len() {
            return None;
        }
        let sum: f32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Some(sum.sqrt())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: FaceBox,
    /// Landmark points in frame pixels; layout is model specific
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Option<FaceDescriptor>,
}

impl Detection {
    pub fn from_box(bbox: FaceBox) -> Self {
        Self {
            bbox,
            landmarks: Vec::new(),
            descriptor: None,
        }
    }
}

/// Single-face detector.
///
/// Returns the adapter's best face for a frame, if any. The session never
/// has more than one `detect` call outstanding.
#[async_trait]
pub trait FaceDetector: Send + 'static {
    /// Whether models are loaded and `detect` may be called
    fn is_ready(&self) -> bool;

    /// Load models. A failure here is fatal to the session.
    async fn load(&mut self) -> Result<(), DetectorError>;

    async fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Detection>, DetectorError>;
}
