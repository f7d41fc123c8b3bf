//! Video source capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CameraError, VideoFrame};

/// Which camera to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Front camera, looking at the person at the kiosk
    #[default]
    User,
    /// Rear camera
    Environment,
}

/// Requested stream geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Camera facing mode
    pub facing: Facing,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: Facing::User,
        }
    }
}

/// An acquired stream.
///
/// Not `Clone`: handing it back to [`VideoSource::release`] consumes it, so
/// each acquisition is released at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct CameraStream {
    id: u64,
    width: u32,
    height: u32,
}

impl CameraStream {
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Acquisition bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub acquisitions: u64,
    pub releases: u64,
}

impl SourceStats {
    /// Whether a stream is currently held
    pub fn streaming(&self) -> bool {
        self.acquisitions > self.releases
    }
}

/// A live camera (or something that behaves like one)
#[async_trait]
pub trait VideoSource: Send + 'static {
    /// Open the camera. Fails with [`CameraError::Unavailable`] when there is
    /// no device or permission was denied.
    async fn acquire(&mut self, constraints: &StreamConstraints) -> Result<CameraStream, CameraError>;

    /// Latest frame of an acquired stream, if one has arrived yet
    fn current_frame(&mut self, stream: &CameraStream) -> Option<VideoFrame>;

    /// Stop the underlying hardware track
    fn release(&mut self, stream: CameraStream);

    /// Acquisition counters
    fn stats(&self) -> SourceStats;
}
