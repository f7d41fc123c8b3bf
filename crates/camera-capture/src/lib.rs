//! Camera Capture Library for the check-in kiosk
//!
//! Provides the video source side of the face check-in flow:
//! - Decoded RGB frames and JPEG encoding for submission
//! - The `VideoSource` capability (acquire / current frame / release)
//! - A channel-fed source for capture threads and a directory replay source

pub mod feed;
pub mod frame;
pub mod image_dir;
pub mod source;

pub use feed::{FeedSource, FrameFeed};
pub use frame::VideoFrame;
pub use image_dir::ImageDirSource;
pub use source::{CameraStream, Facing, SourceStats, StreamConstraints, VideoSource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Camera already streaming")]
    Busy,

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),
}
