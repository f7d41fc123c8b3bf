//! Channel-fed video source
//!
//! A capture thread owns the [`FrameFeed`] and pushes decoded frames into it;
//! the session owns the [`FeedSource`] and only ever looks at the latest one.
//! Older frames are overwritten, never queued.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{CameraError, CameraStream, SourceStats, StreamConstraints, VideoFrame, VideoSource};

/// Producer half: pushes frames into the source
#[derive(Debug, Clone)]
pub struct FrameFeed {
    tx: watch::Sender<Option<VideoFrame>>,
}

impl FrameFeed {
    /// Publish a new latest frame
    pub fn push(&self, frame: VideoFrame) {
        self.tx.send_replace(Some(frame));
    }

    /// Drop the current frame (e.g. the device is between frames after a restart)
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

/// Consumer half: a [`VideoSource`] reading the latest pushed frame
#[derive(Debug)]
pub struct FeedSource {
    rx: watch::Receiver<Option<VideoFrame>>,
    active: Option<u64>,
    next_id: u64,
    stats: SourceStats,
    denied: bool,
}

/// Create a connected feed/source pair
pub fn channel() -> (FrameFeed, FeedSource) {
    let (tx, rx) = watch::channel(None);
    (
        FrameFeed { tx },
        FeedSource {
            rx,
            active: None,
            next_id: 1,
            stats: SourceStats::default(),
            denied: false,
        },
    )
}

impl FeedSource {
    /// Simulate a denied camera permission for subsequent acquisitions
    pub fn deny_access(&mut self, denied: bool) {
        self.denied = denied;
    }
}

#[async_trait]
impl VideoSource for FeedSource {
    async fn acquire(&mut self, constraints: &StreamConstraints) -> Result<CameraStream, CameraError> {
        if self.denied {
            warn!("Camera access denied");
            return Err(CameraError::Unavailable("permission denied".to_string()));
        }
        if self.active.is_some() {
            return Err(CameraError::Busy);
        }
        if self.rx.has_changed().is_err() {
            return Err(CameraError::Unavailable("capture feed closed".to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(id);
        self.stats.acquisitions += 1;

        info!(
            "Feed stream {} acquired ({}x{}, {:?})",
            id, constraints.width, constraints.height, constraints.facing
        );
        Ok(CameraStream::new(id, constraints.width, constraints.height))
    }

    fn current_frame(&mut self, stream: &CameraStream) -> Option<VideoFrame> {
        if self.active != Some(stream.id()) {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }

    fn release(&mut self, stream: CameraStream) {
        if self.active == Some(stream.id()) {
            self.active = None;
            self.stats.releases += 1;
            debug!("Feed stream {} released", stream.id());
        } else {
            warn!("Ignoring release of unknown stream {}", stream.id());
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}
