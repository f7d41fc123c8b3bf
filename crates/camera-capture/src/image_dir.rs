//! Directory replay source
//!
//! Loops over the still images in a directory as if they were a live camera.
//! Used for kiosk demos and for exercising the check-in flow without hardware.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use image::imageops::FilterType;
use tracing::{debug, info, warn};

use crate::frame::decode_image;
use crate::{CameraError, CameraStream, SourceStats, StreamConstraints, VideoFrame, VideoSource};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Replays images from a directory in file-name order
#[derive(Debug)]
pub struct ImageDirSource {
    dir: PathBuf,
    frames: Vec<VideoFrame>,
    cursor: usize,
    active: Option<u64>,
    next_id: u64,
    started: Option<Instant>,
    stats: SourceStats,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Vec::new(),
            cursor: 0,
            active: None,
            next_id: 1,
            started: None,
            stats: SourceStats::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn load_frames(dir: &Path, constraints: StreamConstraints) -> Result<Vec<VideoFrame>, CameraError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CameraError::Unavailable(format!("{}: {}", dir.display(), e)))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for (sequence, path) in paths.iter().enumerate() {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let frame = match decode_image(&bytes, sequence as u32) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        frames.push(fit_to(frame, constraints));
    }

    if frames.is_empty() {
        return Err(CameraError::Unavailable(format!(
            "no readable images in {}",
            dir.display()
        )));
    }
    Ok(frames)
}

/// Scale a frame to the requested geometry, as a camera honouring the
/// constraints would deliver it
fn fit_to(frame: VideoFrame, constraints: StreamConstraints) -> VideoFrame {
    if frame.width == constraints.width && frame.height == constraints.height {
        return frame;
    }
    let sequence = frame.sequence;
    match frame.to_image() {
        Some(img) => {
            let resized = image::imageops::resize(
                &img,
                constraints.width,
                constraints.height,
                FilterType::Triangle,
            );
            VideoFrame::from_image(resized, 0, sequence)
        }
        None => frame,
    }
}

#[async_trait]
impl VideoSource for ImageDirSource {
    async fn acquire(&mut self, constraints: &StreamConstraints) -> Result<CameraStream, CameraError> {
        if self.active.is_some() {
            return Err(CameraError::Busy);
        }

        let dir = self.dir.clone();
        let constraints = *constraints;
        let frames = tokio::task::spawn_blocking(move || load_frames(&dir, constraints))
            .await
            .map_err(|e| CameraError::Unavailable(e.to_string()))??;

        info!("Replaying {} frames from {}", frames.len(), self.dir.display());

        let id = self.next_id;
        self.next_id += 1;
        self.frames = frames;
        self.cursor = 0;
        self.active = Some(id);
        self.started = Some(Instant::now());
        self.stats.acquisitions += 1;
        Ok(CameraStream::new(id, constraints.width, constraints.height))
    }

    fn current_frame(&mut self, stream: &CameraStream) -> Option<VideoFrame> {
        if self.active != Some(stream.id()) || self.frames.is_empty() {
            return None;
        }
        let mut frame = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        frame.timestamp_ns = self
            .started
            .map(|t| t.elapsed().as_nanos() as u64)
            .unwrap_or(0);
        Some(frame)
    }

    fn release(&mut self, stream: CameraStream) {
        if self.active == Some(stream.id()) {
            self.active = None;
            self.frames.clear();
            self.stats.releases += 1;
            debug!("Replay stream {} released", stream.id());
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("camera-capture-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_replays_in_name_order() {
        let dir = temp_dir("order");
        RgbImage::from_pixel(64, 48, image::Rgb([10, 10, 10]))
            .save(dir.join("b.png"))
            .unwrap();
        RgbImage::from_pixel(64, 48, image::Rgb([200, 200, 200]))
            .save(dir.join("a.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), b"not an image").unwrap();

        let constraints = StreamConstraints {
            width: 32,
            height: 24,
            ..Default::default()
        };
        let mut source = ImageDirSource::new(&dir);
        let stream = source.acquire(&constraints).await.unwrap();

        let first = source.current_frame(&stream).unwrap();
        let second = source.current_frame(&stream).unwrap();
        let third = source.current_frame(&stream).unwrap();
        assert_eq!((first.width, first.height), (32, 24));
        assert_eq!(first.get_pixel(0, 0), Some([200, 200, 200]));
        assert_eq!(second.get_pixel(0, 0), Some([10, 10, 10]));
        assert_eq!(third.sequence, first.sequence);

        source.release(stream);
        assert!(!source.stats().streaming());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_empty_dir_is_unavailable() {
        let dir = temp_dir("empty");
        let mut source = ImageDirSource::new(&dir);
        assert!(matches!(
            source.acquire(&StreamConstraints::default()).await,
            Err(CameraError::Unavailable(_))
        ));
        assert_eq!(source.stats().acquisitions, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
