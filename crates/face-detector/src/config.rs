//! Detector configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Face detection model (UltraFace RFB/slim export)
    pub model_path: PathBuf,

    /// Face embedding model; without it detections carry no descriptor
    pub embedding_model_path: Option<PathBuf>,

    /// Detector input width in pixels; height is 3/4 of it
    pub input_size: u32,

    /// Minimum face score
    pub score_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/version-RFB-320.onnx"),
            embedding_model_path: None,
            input_size: 320,
            score_threshold: 0.5,
        }
    }
}

impl DetectorConfig {
    /// Detector input as (width, height)
    pub fn input_dims(&self) -> (u32, u32) {
        (self.input_size, self.input_size * 3 / 4)
    }

    /// Stricter threshold for brightly lit desks with few false positives
    pub fn strict() -> Self {
        Self {
            score_threshold: 0.7,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_input_dims() {
        assert_eq!(DetectorConfig::default().input_dims(), (320, 240));
        let wide = DetectorConfig {
            input_size: 640,
            ..Default::default()
        };
        assert_eq!(wide.input_dims(), (640, 480));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: DetectorConfig =
            serde_json::from_str(r#"{"embedding_model_path": "models/arcface.onnx"}"#).unwrap();
        assert_eq!(config.input_size, 320);
        assert_eq!(
            config.embedding_model_path,
            Some(PathBuf::from("models/arcface.onnx"))
        );
    }
}
