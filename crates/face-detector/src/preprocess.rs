//! Tensor preparation and output decoding

use camera_capture::VideoFrame;
use capture_session::{DetectorError, FaceBox};
use image::imageops::{self, FilterType};
use ndarray::Array4;

/// Per-channel pixel normalisation: `(p - mean) / scale`
#[derive(Debug, Clone, Copy)]
pub(crate) struct Normalization {
    pub mean: f32,
    pub scale: f32,
}

pub(crate) const DETECTION_NORM: Normalization = Normalization {
    mean: 127.0,
    scale: 128.0,
};

pub(crate) const EMBEDDING_NORM: Normalization = Normalization {
    mean: 127.5,
    scale: 127.5,
};

/// Resize a frame and lay it out as a `1x3xHxW` tensor
pub(crate) fn to_tensor(
    frame: &VideoFrame,
    width: u32,
    height: u32,
    norm: Normalization,
) -> Result<Array4<f32>, DetectorError> {
    let img = frame.to_image().ok_or_else(|| {
        DetectorError::ImageProcessing(format!(
            "{} bytes do not form a {}x{} RGB frame",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })?;
    let resized = imageops::resize(&img, width, height, FilterType::Triangle);

    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - norm.mean) / norm.scale;
        }
    }
    Ok(input)
}

/// Highest-scoring face from UltraFace outputs.
///
/// `scores` is `[N, 2]` (background, face) and `boxes` is `[N, 4]` with
/// corners normalised to the input, both flattened. The box is mapped to
/// frame pixels and clamped to the frame.
pub(crate) fn best_face(
    scores: &[f32],
    boxes: &[f32],
    threshold: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<FaceBox> {
    let candidates = (scores.len() / 2).min(boxes.len() / 4);

    let mut best: Option<(usize, f32)> = None;
    for i in 0..candidates {
        let score = scores[i * 2 + 1];
        if score >= threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    let (i, confidence) = best?;

    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let x1 = (boxes[i * 4] * fw).clamp(0.0, fw);
    let y1 = (boxes[i * 4 + 1] * fh).clamp(0.0, fh);
    let x2 = (boxes[i * 4 + 2] * fw).clamp(0.0, fw);
    let y2 = (boxes[i * 4 + 3] * fh).clamp(0.0, fh);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(FaceBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
        confidence,
    })
}

/// Pixels inside the face box, for the embedding model
pub(crate) fn face_crop(frame: &VideoFrame, face: &FaceBox) -> Option<VideoFrame> {
    let x = face.x.max(0.0).floor() as u32;
    let y = face.y.max(0.0).floor() as u32;
    let w = (face.width.round() as u32).min(frame.width.saturating_sub(x));
    let h = (face.height.round() as u32).min(frame.height.saturating_sub(y));
    frame.crop(x, y, w, h)
}
