//! Capture session error types

use serde::Serialize;
use thiserror::Error;

/// Errors that end a session attempt. Surfaced once, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No camera, or permission denied
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// The detector never became ready
    #[error("Face model failed to load: {0}")]
    ModelLoadFailure(String),

    /// `start()` on a session whose loop is still running
    #[error("Capture session already running")]
    AlreadyRunning,

    /// The polling task panicked and took the camera and detector with it
    #[error("Capture session terminated unexpectedly")]
    Terminated,

    /// Invalid session configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why one submission attempt failed. The loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SubmissionFailure {
    /// The lookup backend errored (network, server, malformed response)
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// No answer within the lookup timeout
    #[error("Lookup timed out after {0}ms")]
    Timeout(u64),

    /// The frame could not be encoded for upload
    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// Non-fatal errors recorded on the session for display
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransientError {
    /// Detection failed on one tick; treated as "no face"
    #[error("Detection failed: {0}")]
    DetectionFailure(String),

    #[error(transparent)]
    SubmissionFailure(#[from] SubmissionFailure),
}
