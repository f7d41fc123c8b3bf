//! Type-erased handle on the capture controller

use async_trait::async_trait;
use camera_capture::VideoSource;
use capture_session::{CaptureController, FaceDetector, IdentityLookup, SessionError, SessionStatus};
use tokio::sync::watch;

/// What the API needs from a capture session, independent of which camera,
/// detector and lookup backend it was built with
#[async_trait]
pub trait SessionControl: Send {
    async fn start(&mut self) -> Result<(), SessionError>;

    async fn reset(&mut self) -> Result<(), SessionError>;

    async fn stop(&mut self);

    fn subscribe(&self) -> watch::Receiver<SessionStatus>;
}

#[async_trait]
impl<V, D, L> SessionControl for CaptureController<V, D, L>
where
    V: VideoSource,
    D: FaceDetector,
    L: IdentityLookup,
{
    async fn start(&mut self) -> Result<(), SessionError> {
        CaptureController::start(self).await
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        CaptureController::reset(self).await
    }

    async fn stop(&mut self) {
        CaptureController::stop(self).await
    }

    fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        CaptureController::subscribe(self)
    }
}
