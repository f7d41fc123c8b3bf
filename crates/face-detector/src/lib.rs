//! Face detection for the check-in kiosk
//!
//! ONNX Runtime implementation of the session's `FaceDetector` capability:
//! - UltraFace-style detector for the single most confident face
//! - Optional ArcFace-style embedding of the detected face

pub mod config;
pub mod onnx;
mod preprocess;

pub use config::DetectorConfig;
pub use onnx::OnnxFaceDetector;
