//! ONNX Runtime face detector

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use camera_capture::VideoFrame;
use capture_session::{Detection, DetectorError, FaceDescriptor, FaceDetector};
use ort::session::Session;
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::preprocess::{best_face, face_crop, to_tensor, DETECTION_NORM, EMBEDDING_NORM};

/// ArcFace-style embedding input size
const EMBEDDING_SIZE: u32 = 112;

struct Models {
    detection: Session,
    embedding: Option<Session>,
}

/// Face detector backed by ONNX Runtime sessions.
///
/// Models are loaded on `load()`, not on construction, so a kiosk can show
/// its loading state while the weights are read.
pub struct OnnxFaceDetector {
    config: DetectorConfig,
    models: Option<Models>,
}

impl OnnxFaceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            models: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn embed(session: &mut Session, frame: &VideoFrame) -> Result<FaceDescriptor, DetectorError> {
        let input = to_tensor(frame, EMBEDDING_SIZE, EMBEDDING_SIZE, EMBEDDING_NORM)?;
        let value = ort::value::Tensor::from_array(input)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![value])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let embedding = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        Ok(FaceDescriptor(embedding.iter().copied().collect()).normalized())
    }
}

fn open_session(path: &Path) -> Result<Session, DetectorError> {
    if !path.is_file() {
        return Err(DetectorError::ModelLoad(format!(
            "model file not found: {}",
            path.display()
        )));
    }
    info!("Loading ONNX model from {}", path.display());
    Session::builder()
        .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| DetectorError::ModelLoad(format!("{}: {}", path.display(), e)))
}

fn open_models(detection: PathBuf, embedding: Option<PathBuf>) -> Result<Models, DetectorError> {
    let detection = open_session(&detection)?;
    let embedding = embedding.as_deref().map(open_session).transpose()?;
    Ok(Models {
        detection,
        embedding,
    })
}

/// An embedding failure keeps the face; only descriptor-based lookups need it
fn with_descriptor(
    mut detection: Detection,
    embedded: Result<FaceDescriptor, DetectorError>,
) -> Detection {
    match embedded {
        Ok(descriptor) => detection.descriptor = Some(descriptor),
        Err(e) => warn!("Embedding failed, keeping face without descriptor: {}", e),
    }
    detection
}

#[async_trait]
impl FaceDetector for OnnxFaceDetector {
    fn is_ready(&self) -> bool {
        self.models.is_some()
    }

    async fn load(&mut self) -> Result<(), DetectorError> {
        if self.models.is_some() {
            return Ok(());
        }
        let detection = self.config.model_path.clone();
        let embedding = self.config.embedding_model_path.clone();
        if embedding.is_none() {
            warn!("No embedding model configured; detections will carry no descriptor");
        }

        let models = tokio::task::spawn_blocking(move || open_models(detection, embedding))
            .await
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))??;
        self.models = Some(models);
        info!("Face detector ready");
        Ok(())
    }

    async fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Detection>, DetectorError> {
        let (input_width, input_height) = self.config.input_dims();
        let threshold = self.config.score_threshold;
        let models = self.models.as_mut().ok_or(DetectorError::NotReady)?;

        let input = to_tensor(frame, input_width, input_height, DETECTION_NORM)?;
        let value = ort::value::Tensor::from_array(input)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = models
            .detection
            .run(ort::inputs![value])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        // UltraFace: scores [1, N, 2], boxes [1, N, 4]
        if outputs.len() < 2 {
            return Err(DetectorError::Inference(format!(
                "detection model returned {} outputs, expected 2",
                outputs.len()
            )));
        }
        let scores = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let boxes = outputs[1]
            .try_extract_array::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let scores: Vec<f32> = scores.iter().copied().collect();
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        drop(outputs);

        let Some(face) = best_face(&scores, &boxes, threshold, frame.width, frame.height) else {
            return Ok(None);
        };
        debug!(
            "Face at ({:.0}, {:.0}) {:.0}x{:.0}, score {:.2}",
            face.x, face.y, face.width, face.height, face.confidence
        );

        let mut detection = Detection::from_box(face);
        if let Some(session) = models.embedding.as_mut() {
            match face_crop(frame, &face) {
                Some(crop) => {
                    detection = with_descriptor(detection, Self::embed(session, &crop));
                }
                None => debug!("Face box too small to embed"),
            }
        }
        Ok(Some(detection))
    }
}
